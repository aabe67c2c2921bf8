use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Armor parse error: {0}")]
    ArmorParse(String),

    #[error("Dump parse error at line {line}: {message}")]
    DumpParse { line: usize, message: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Archive is missing its {0} member")]
    MissingMember(&'static str),

    #[error("Unexpected archive member: {0}")]
    UnexpectedMember(String),

    #[error("Archive member {name} inflates past {limit} bytes")]
    MemberTooLarge { name: String, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ProtoError {
    fn from(e: zip::result::ZipError) -> Self {
        ProtoError::Archive(e.to_string())
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
