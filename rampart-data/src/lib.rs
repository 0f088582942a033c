pub mod backend;
pub mod entity;
pub mod error;
pub mod filter;
pub mod memory;
pub mod page;
pub mod query;
pub mod sql;

pub use backend::{RecordKey, StorageBackend};
pub use entity::{Entity, EntityBase, EntityDescriptor};
pub use error::DataError;
pub use filter::{parse_filter, FilterRequest, Operator, ParsedFilter, Predicate, SortDirection};
pub use memory::MemoryDocumentStore;
pub use page::Page;
pub use query::{
    translator, BackendKind, DeletedFilter, DocumentQuery, IdentifierLookup, NativeQuery, QueryTranslator,
    RelationalQuery,
};
pub use sql::{SqlParam, SqlRenderer};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        parse_filter, Entity, EntityBase, EntityDescriptor, FilterRequest, NativeQuery, Page, StorageBackend,
    };
}
