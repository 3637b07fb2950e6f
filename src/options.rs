/// Configures request timeout, script chunking and batch output trimming.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Scripts longer than this many bytes, executed without arguments, are
    /// run in chunks inside an explicit transaction.
    pub chunk_threshold_bytes: usize,
    /// Maximum number of statements per chunk.
    pub chunk_size: usize,
    /// Keep the synthetic `ROLLBACK` step in transactional batch output.
    pub schema_db: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            chunk_threshold_bytes: 1024 * 1024,
            chunk_size: 4096,
            schema_db: false,
        }
    }
}

impl ClientOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_chunk_threshold_bytes(mut self, bytes: usize) -> Self {
        self.chunk_threshold_bytes = bytes;
        self
    }

    /// Values below one are raised to one.
    pub fn with_chunk_size(mut self, statements: usize) -> Self {
        self.chunk_size = statements.max(1);
        self
    }

    pub fn with_schema_db(mut self, schema_db: bool) -> Self {
        self.schema_db = schema_db;
        self
    }
}
