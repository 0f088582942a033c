//! Explicit dependency-injection container.
//!
//! Components declare the types they depend on and how to build themselves
//! from a resolved [`BeanContext`]. The [`BeanRegistry`] orders construction
//! topologically, so every component receives its collaborators as
//! constructor arguments instead of reaching into process-wide globals.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use crate::BoxFuture;

/// A typed dependency edge: the `TypeId` used for lookup plus a readable name
/// for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl Dependency {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// A component that can be built synchronously from already-resolved beans.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not registered as a Bean",
    label = "this type is not a bean",
    note = "implement `Bean` for the type, or `.provide()` a pre-built instance"
)]
pub trait Bean: Clone + Send + Sync + 'static {
    /// Types that must be resolved before this bean can be built.
    fn dependencies() -> Vec<Dependency>;

    /// Build the bean. Every declared dependency is present in `ctx`.
    fn build(ctx: &BeanContext) -> Result<Self, BeanError>;
}

/// An async factory for a type the application does not own (connection
/// pools, storage backends, ...). The output is registered under
/// `Self::Output`.
pub trait Producer: Send + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn dependencies() -> Vec<Dependency>;

    fn produce(ctx: &BeanContext) -> impl Future<Output = Result<Self::Output, BeanError>> + Send + '_;
}

/// Read-only container of resolved instances keyed by `TypeId`.
pub struct BeanContext {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for BeanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanContext")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl BeanContext {
    /// Clone a resolved instance out of the context.
    pub fn get<T: Clone + 'static>(&self) -> Result<T, BeanError> {
        self.try_get::<T>().ok_or_else(|| BeanError::MissingDependency {
            bean: "<context>".to_string(),
            dependency: type_name::<T>().to_string(),
        })
    }

    pub fn try_get<T: Clone + 'static>(&self) -> Option<T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Errors raised while resolving the bean graph.
#[derive(Debug)]
pub enum BeanError {
    CyclicDependency { cycle: Vec<String> },
    MissingDependency { bean: String, dependency: String },
    DuplicateBean { type_name: String },
    /// A bean's own constructor failed (bad config, unreachable backend, ...).
    Construction { bean: String, message: String },
}

impl BeanError {
    pub fn construction<T: 'static>(message: impl fmt::Display) -> Self {
        BeanError::Construction {
            bean: type_name::<T>().to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for BeanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeanError::CyclicDependency { cycle } => {
                write!(f, "Circular dependency detected: {}", cycle.join(" -> "))
            }
            BeanError::MissingDependency { bean, dependency } => write!(
                f,
                "Missing dependency for bean '{bean}': type '{dependency}' is neither provided nor registered"
            ),
            BeanError::DuplicateBean { type_name } => {
                write!(f, "Bean of type '{type_name}' registered twice")
            }
            BeanError::Construction { bean, message } => {
                write!(f, "Failed to construct bean '{bean}': {message}")
            }
        }
    }
}

impl std::error::Error for BeanError {}

type Instance = Box<dyn Any + Send + Sync>;

/// Takes the context by value so the async factory can borrow it freely and
/// hands it back together with the built instance.
type Factory = Box<dyn FnOnce(BeanContext) -> BoxFuture<'static, (BeanContext, Result<Instance, BeanError>)> + Send>;

struct Registration {
    provides: Dependency,
    dependencies: Vec<Dependency>,
    factory: Factory,
}

/// Collects provided instances and bean registrations, then resolves them
/// into a [`BeanContext`].
///
/// ```ignore
/// let mut registry = BeanRegistry::new();
/// registry
///     .provide(config)
///     .provide::<Arc<dyn StorageBackend>>(backend)
///     .register::<CacheLayer>()
///     .register::<AccessResolver>();
/// let ctx = registry.resolve().await?;
/// let resolver: AccessResolver = ctx.get()?;
/// ```
#[derive(Default)]
pub struct BeanRegistry {
    registrations: Vec<Registration>,
    provided: HashMap<TypeId, Instance>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a pre-built instance available to beans depending on `T`.
    pub fn provide<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.provided.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn register<T: Bean>(&mut self) -> &mut Self {
        self.registrations.push(Registration {
            provides: Dependency::of::<T>(),
            dependencies: T::dependencies(),
            factory: Box::new(|ctx| {
                Box::pin(async move {
                    let built = T::build(&ctx).map(|bean| Box::new(bean) as Instance);
                    (ctx, built)
                }) as BoxFuture<'static, _>
            }),
        });
        self
    }

    pub fn register_producer<P: Producer>(&mut self) -> &mut Self {
        self.registrations.push(Registration {
            provides: Dependency::of::<P::Output>(),
            dependencies: P::dependencies(),
            factory: Box::new(|ctx| {
                Box::pin(async move {
                    let built = P::produce(&ctx)
                        .await
                        .map(|out| Box::new(out) as Instance);
                    (ctx, built)
                }) as BoxFuture<'static, _>
            }),
        });
        self
    }

    /// Validate the graph and construct every registered bean in dependency
    /// order (Kahn's algorithm).
    pub async fn resolve(self) -> Result<BeanContext, BeanError> {
        let BeanRegistry {
            registrations,
            provided,
        } = self;

        let index = Self::index(&registrations, &provided)?;
        Self::check_dependencies(&registrations, &provided, &index)?;
        let order = Self::construction_order(&registrations, &index)?;

        let mut slots: Vec<Option<Registration>> = registrations.into_iter().map(Some).collect();
        let mut ctx = BeanContext { entries: provided };
        for idx in order {
            let Some(registration) = slots[idx].take() else {
                continue;
            };
            let provides = registration.provides;
            tracing::trace!(bean = provides.type_name, "constructing bean");
            let (returned, built) = (registration.factory)(ctx).await;
            ctx = returned;
            ctx.entries.insert(provides.type_id, built?);
        }
        Ok(ctx)
    }

    fn index(
        registrations: &[Registration],
        provided: &HashMap<TypeId, Instance>,
    ) -> Result<HashMap<TypeId, usize>, BeanError> {
        let mut index = HashMap::with_capacity(registrations.len());
        for (i, reg) in registrations.iter().enumerate() {
            let duplicate = provided.contains_key(&reg.provides.type_id)
                || index.insert(reg.provides.type_id, i).is_some();
            if duplicate {
                return Err(BeanError::DuplicateBean {
                    type_name: reg.provides.type_name.to_string(),
                });
            }
        }
        Ok(index)
    }

    fn check_dependencies(
        registrations: &[Registration],
        provided: &HashMap<TypeId, Instance>,
        index: &HashMap<TypeId, usize>,
    ) -> Result<(), BeanError> {
        for reg in registrations {
            if let Some(missing) = reg
                .dependencies
                .iter()
                .find(|dep| !provided.contains_key(&dep.type_id) && !index.contains_key(&dep.type_id))
            {
                return Err(BeanError::MissingDependency {
                    bean: reg.provides.type_name.to_string(),
                    dependency: missing.type_name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn construction_order(
        registrations: &[Registration],
        index: &HashMap<TypeId, usize>,
    ) -> Result<Vec<usize>, BeanError> {
        let count = registrations.len();
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, reg) in registrations.iter().enumerate() {
            for dep in &reg.dependencies {
                if let Some(&d) = index.get(&dep.type_id) {
                    pending[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: Vec<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(i) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(next);
                }
            }
        }

        if order.len() != count {
            let cycle = (0..count)
                .filter(|&i| pending[i] > 0)
                .map(|i| registrations[i].provides.type_name.to_string())
                .collect();
            return Err(BeanError::CyclicDependency { cycle });
        }
        Ok(order)
    }
}
