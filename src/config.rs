use crc32fast::Hasher;

/// Static configuration describing how a SeaORM model is bound to its
/// closure table.
#[derive(Clone, Debug)]
pub struct ClosureTableConfig {
    entity_name: String,
    closure_name: String,
    parent_column: String,
    closure_table: String,
    delete_mode: DeleteMode,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl ClosureTableConfig {
    /// Create a new configuration using the logical entity and closure names.
    pub fn new(entity_name: impl Into<String>, closure_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let closure_name = closure_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &closure_name,
        ));

        Self {
            entity_name,
            closure_name,
            parent_column: "parent_id".to_string(),
            closure_table: String::new(),
            delete_mode: DeleteMode::default(),
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`ClosureTableOptions`].
    pub(crate) fn apply_options(mut self, options: ClosureTableOptions) -> Self {
        if let Some(parent_column) = options.parent_column {
            self.parent_column = parent_column;
        }
        if let Some(closure_table) = options.closure_table {
            self.closure_table = closure_table;
        }
        if let Some(mode) = options.delete_mode {
            self.delete_mode = mode;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable Rust struct name for the node entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Logical name of the closure entity.
    pub fn closure_name(&self) -> &str {
        &self.closure_name
    }

    /// Column name storing the parent foreign key.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    /// Table backing the closure entity.
    pub fn closure_table(&self) -> &str {
        &self.closure_table
    }

    /// What [`destroy`](crate::ClosureTreeRepository::destroy) does with a node's children.
    pub fn delete_mode(&self) -> DeleteMode {
        self.delete_mode
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style options consumed by the derive macro.
#[derive(Clone, Debug, Default)]
pub struct ClosureTableOptions {
    parent_column: Option<String>,
    closure_table: Option<String>,
    delete_mode: Option<DeleteMode>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl ClosureTableOptions {
    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn closure_table(mut self, value: impl Into<String>) -> Self {
        self.closure_table = Some(value.into());
        self
    }

    pub fn delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = Some(mode);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: ClosureTableConfig) -> ClosureTableConfig {
        base.apply_options(self)
    }
}

/// Behaviour applied to a node's children when the node is destroyed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DeleteMode {
    /// Only leaves may be deleted; anything else fails with `HasChildren`.
    #[default]
    Restrict,
    /// Children are re-attached to the deleted node's parent (or become roots).
    PromoteChildren,
    /// The node and its whole subtree are deleted.
    Subtree,
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, closure: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(closure.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-table::{entity}::{closure}::{crc:x}"))
    }
}

/// Configuration describing how to serialize structural mutations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}
