use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] lad_pipeline::PipelineError),

    #[error("backup error: {0}")]
    Backup(#[from] lad_backup::BackupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
