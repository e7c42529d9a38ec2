use uuid::Uuid;

/// Identifier of a replicated table.
///
/// Carries the keyspace and table names for display and lock naming, but
/// identity is the stable table id: a table that is dropped and re-created
/// under the same name is a different table.
#[derive(Debug, Clone)]
pub struct TableReference {
    keyspace: String,
    table: String,
    id: Uuid,
}

impl TableReference {
    /// Creates a reference from the schema-assigned table id and names.
    #[must_use]
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>, id: Uuid) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            id,
        }
    }

    /// The keyspace name.
    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The stable table id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

// Identity is the table id only; names are carried for presentation.
impl PartialEq for TableReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TableReference {}

impl std::hash::Hash for TableReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for TableReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}
