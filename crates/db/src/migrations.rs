/// Inline SQL migrations for the docwright queue schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    repository TEXT NOT NULL,
    spec TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    max_attempts INTEGER NOT NULL DEFAULT 3 CHECK (max_attempts >= 1),
    locked_by TEXT,
    lease_until INTEGER,
    run_at INTEGER,
    dedupe_key TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    progress_message TEXT,
    current_step INTEGER,
    total_steps INTEGER,
    result TEXT,
    last_error TEXT,
    last_failed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER
);
"#,
    // Migration 2: claim scan + reclaim sweep indexes
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(status, run_at, created_at);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(status, lease_until);"#,
    // Migration 3: at most one ACTIVE job per dedupe key. Partial unique
    // index makes concurrent creates race-safe: the loser hits a UNIQUE
    // violation and re-reads the winner's id.
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_dedupe_active
    ON jobs(dedupe_key)
    WHERE dedupe_key IS NOT NULL
      AND status IN ('pending', 'claimed', 'cloning', 'analyzing');
"#,
    // Migration 4: documents table
    r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    repository TEXT NOT NULL,
    source_key TEXT NOT NULL,
    slug TEXT NOT NULL,
    title TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    chapter_index INTEGER,
    run_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(repository, source_key)
);
"#,
    // Migration 5: documents lookup indexes
    r#"CREATE INDEX IF NOT EXISTS idx_documents_job ON documents(job_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_documents_repo ON documents(repository);"#,
];
