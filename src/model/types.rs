use serde::{Deserialize, Serialize};

/// Data types a query definition may declare for its parameters.
///
/// Decoded from the canonical uppercase token in the queries file; an
/// unrecognized token fails deserialization of the whole definition. Not to
/// be confused with the wire types a query can *return* — those live in the
/// materializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    Short,
    Integer,
    Long,
    String,
    Float,
    Double,
    Guid,
    Date,
    Timestamp,
    Json,
    ArrayVarchar,
    ArrayInteger,
    ArrayDate,
}

impl DataType {
    /// The canonical token as written in a queries file.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Short => "SHORT",
            DataType::Integer => "INTEGER",
            DataType::Long => "LONG",
            DataType::String => "STRING",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Guid => "GUID",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Json => "JSON",
            DataType::ArrayVarchar => "ARRAY_VARCHAR",
            DataType::ArrayInteger => "ARRAY_INTEGER",
            DataType::ArrayDate => "ARRAY_DATE",
        }
    }
}

/// Kind of request a definition services. Only standalone row-returning
/// statements are supported; keeping this a closed enum makes any future
/// token a load-time parse error instead of a silent pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MethodType {
    StandaloneRequest,
}
