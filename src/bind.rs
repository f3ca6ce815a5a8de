//! Translation of caller-supplied string parameters into typed, named bind
//! values, and rewriting of `{name}` placeholders into the native `$n` bind
//! syntax.
//!
//! Every declared scalar type is parsed and validated here, before anything
//! reaches the driver, so a malformed value fails with a bind error naming
//! the offending parameter instead of an opaque backend failure.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{placeholders, DataType, MethodDefinition, QueryParameter};

/// One decoded bind value, tagged with the native type it will be sent as.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// An optional declared parameter the caller did not supply. Carries the
    /// declared type so the NULL is sent with a wire type the statement's
    /// placeholder accepts.
    Null(DataType),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
    TextArray(Vec<String>),
    Int4Array(Vec<i32>),
    DateArray(Vec<NaiveDate>),
}

static NULL_BOOL: Option<bool> = None;
static NULL_INT2: Option<i16> = None;
static NULL_INT4: Option<i32> = None;
static NULL_INT8: Option<i64> = None;
static NULL_FLOAT4: Option<f32> = None;
static NULL_FLOAT8: Option<f64> = None;
static NULL_TEXT: Option<&str> = None;
static NULL_UUID: Option<Uuid> = None;
static NULL_DATE: Option<NaiveDate> = None;
static NULL_TIMESTAMP: Option<NaiveDateTime> = None;
static NULL_JSON: Option<serde_json::Value> = None;
static NULL_TEXT_ARRAY: Option<Vec<String>> = None;
static NULL_INT4_ARRAY: Option<Vec<i32>> = None;
static NULL_DATE_ARRAY: Option<Vec<NaiveDate>> = None;

/// A typed NULL for the declared parameter type, so the driver's type check
/// accepts it wherever a supplied value of that type would bind.
fn null_sql(data_type: DataType) -> &'static (dyn ToSql + Sync) {
    match data_type {
        DataType::Boolean => &NULL_BOOL,
        DataType::Short => &NULL_INT2,
        DataType::Integer => &NULL_INT4,
        DataType::Long => &NULL_INT8,
        DataType::Float => &NULL_FLOAT4,
        DataType::Double => &NULL_FLOAT8,
        DataType::String => &NULL_TEXT,
        DataType::Guid => &NULL_UUID,
        DataType::Date => &NULL_DATE,
        DataType::Timestamp => &NULL_TIMESTAMP,
        DataType::Json => &NULL_JSON,
        DataType::ArrayVarchar => &NULL_TEXT_ARRAY,
        DataType::ArrayInteger => &NULL_INT4_ARRAY,
        DataType::ArrayDate => &NULL_DATE_ARRAY,
    }
}

impl BindValue {
    /// Decode one caller-supplied string according to the parameter's
    /// declared type.
    pub fn decode(param: &QueryParameter, raw: &str) -> Result<Self, EngineError> {
        let fail = |reason: String| EngineError::BindDecode {
            name: param.name.clone(),
            reason,
        };

        match param.data_type {
            DataType::Boolean => raw
                .parse::<bool>()
                .map(BindValue::Bool)
                .map_err(|e| fail(e.to_string())),
            DataType::Short => raw
                .parse::<i16>()
                .map(BindValue::Int2)
                .map_err(|e| fail(e.to_string())),
            DataType::Integer => raw
                .parse::<i32>()
                .map(BindValue::Int4)
                .map_err(|e| fail(e.to_string())),
            DataType::Long => raw
                .parse::<i64>()
                .map(BindValue::Int8)
                .map_err(|e| fail(e.to_string())),
            DataType::String => Ok(BindValue::Text(raw.to_string())),
            DataType::Float => raw
                .parse::<f32>()
                .map(BindValue::Float4)
                .map_err(|e| fail(e.to_string())),
            DataType::Double => raw
                .parse::<f64>()
                .map(BindValue::Float8)
                .map_err(|e| fail(e.to_string())),
            DataType::Guid => Uuid::parse_str(raw)
                .map(BindValue::Uuid)
                .map_err(|e| fail(e.to_string())),
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(BindValue::Date)
                .map_err(|e| fail(e.to_string())),
            DataType::Timestamp => parse_timestamp(raw)
                .map(BindValue::Timestamp)
                .ok_or_else(|| fail(format!("unrecognized timestamp: {raw}"))),
            DataType::Json => serde_json::from_str(raw)
                .map(BindValue::Json)
                .map_err(|e| fail(format!("error unmarshalling json: {e}"))),
            DataType::ArrayVarchar => serde_json::from_str::<Vec<String>>(raw)
                .map(BindValue::TextArray)
                .map_err(|e| fail(format!("error unmarshalling array of strings: {e}"))),
            DataType::ArrayInteger => serde_json::from_str::<Vec<i32>>(raw)
                .map(BindValue::Int4Array)
                .map_err(|e| fail(format!("error unmarshalling array of integers: {e}"))),
            DataType::ArrayDate => {
                let items: Vec<String> = serde_json::from_str(raw)
                    .map_err(|e| fail(format!("error unmarshalling array of dates: {e}")))?;
                let mut dates = Vec::with_capacity(items.len());
                for item in &items {
                    dates.push(
                        NaiveDate::parse_from_str(item, "%Y-%m-%d")
                            .map_err(|e| fail(format!("bad date {item:?}: {e}")))?,
                    );
                }
                Ok(BindValue::DateArray(dates))
            }
        }
    }

    /// The value as the driver's bind trait object.
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            BindValue::Null(data_type) => null_sql(*data_type),
            BindValue::Bool(v) => v,
            BindValue::Int2(v) => v,
            BindValue::Int4(v) => v,
            BindValue::Int8(v) => v,
            BindValue::Float4(v) => v,
            BindValue::Float8(v) => v,
            BindValue::Text(v) => v,
            BindValue::Uuid(v) => v,
            BindValue::Date(v) => v,
            BindValue::Timestamp(v) => v,
            BindValue::Json(v) => v,
            BindValue::TextArray(v) => v,
            BindValue::Int4Array(v) => v,
            BindValue::DateArray(v) => v,
        }
    }
}

/// Accept RFC 3339 or a bare `YYYY-MM-DD[T ]HH:MM:SS[.frac]` local form.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    None
}

/// A mapping from parameter name to decoded bind value, keyed for named
/// substitution rather than positional ordering. Declaration order is
/// preserved.
#[derive(Debug, Clone, Default)]
pub struct NamedBindSet {
    entries: Vec<(String, BindValue)>,
}

impl NamedBindSet {
    /// Decode every declared parameter of `def` from the caller-supplied
    /// strings. Optional parameters absent from the call bind as NULL.
    pub fn bind(
        def: &MethodDefinition,
        call_params: &HashMap<String, String>,
    ) -> Result<Self, EngineError> {
        let mut entries = Vec::with_capacity(def.query_parameters.len());
        for param in &def.query_parameters {
            let value = match call_params.get(&param.name) {
                Some(raw) => BindValue::decode(param, raw)?,
                None => BindValue::Null(param.data_type),
            };
            entries.push((param.name.clone(), value));
        }
        Ok(NamedBindSet { entries })
    }

    pub fn get(&self, name: &str) -> Option<&BindValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A statement ready for the driver: placeholder syntax rewritten to `$n`
/// ordinals, with the bind values carried in ordinal order. Repeated
/// placeholders of the same name share one ordinal.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    params: Vec<BindValue>,
}

impl BoundStatement {
    /// Rewrite every `{name}` placeholder in the definition's statement to
    /// its `$n` ordinal and collect the matching values from `binds`. Pure
    /// string substitution over the placeholder grammar; no SQL parsing.
    pub fn prepare(def: &MethodDefinition, binds: &NamedBindSet) -> Result<Self, EngineError> {
        let query = &def.query;
        let mut sql = String::with_capacity(query.len());
        let mut order: Vec<&str> = Vec::new();
        let mut last = 0;

        for ph in placeholders(query) {
            sql.push_str(&query[last..ph.start]);
            let ordinal = match order.iter().position(|n| *n == ph.name) {
                Some(i) => i + 1,
                None => {
                    order.push(ph.name);
                    order.len()
                }
            };
            sql.push('$');
            sql.push_str(&ordinal.to_string());
            last = ph.end;
        }
        sql.push_str(&query[last..]);

        let mut params = Vec::with_capacity(order.len());
        for name in order {
            let value = binds.get(name).cloned().ok_or_else(|| EngineError::BindDecode {
                name: name.to_string(),
                reason: "placeholder has no bound value".into(),
            })?;
            params.push(value);
        }

        Ok(BoundStatement { sql, params })
    }

    /// The bind values in ordinal order, as the driver's parameter slice.
    pub fn sql_params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|v| v.as_sql()).collect()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MethodType;

    fn param(name: &str, data_type: DataType) -> QueryParameter {
        QueryParameter {
            name: name.into(),
            data_type,
            optional: false,
        }
    }

    fn def(query: &str, params: Vec<QueryParameter>) -> MethodDefinition {
        MethodDefinition {
            enabled: true,
            auth_required: vec![],
            description: String::new(),
            example_call: String::new(),
            service_name: "unittests".into(),
            method_name: "m".into(),
            method_type: MethodType::StandaloneRequest,
            query: query.into(),
            query_parameters: params,
        }
    }

    fn decode(data_type: DataType, raw: &str) -> Result<BindValue, EngineError> {
        BindValue::decode(&param("p", data_type), raw)
    }

    // --- scalar decoding ---

    #[test]
    fn test_scalar_decode_matrix() {
        assert_eq!(decode(DataType::Boolean, "true").unwrap(), BindValue::Bool(true));
        assert_eq!(decode(DataType::Short, "7").unwrap(), BindValue::Int2(7));
        assert_eq!(decode(DataType::Integer, "-12").unwrap(), BindValue::Int4(-12));
        assert_eq!(
            decode(DataType::Long, "8589934592").unwrap(),
            BindValue::Int8(8_589_934_592)
        );
        assert_eq!(decode(DataType::String, "ca").unwrap(), BindValue::Text("ca".into()));
        assert_eq!(decode(DataType::Float, "1.5").unwrap(), BindValue::Float4(1.5));
        assert_eq!(decode(DataType::Double, "2.25").unwrap(), BindValue::Float8(2.25));
    }

    #[test]
    fn test_guid_decode() {
        let v = decode(DataType::Guid, "00112233-4455-6677-8899-aabbccddeeff").unwrap();
        match v {
            BindValue::Uuid(u) => {
                assert_eq!(u.to_string(), "00112233-4455-6677-8899-aabbccddeeff")
            }
            other => panic!("expected uuid, got {other:?}"),
        }
    }

    #[test]
    fn test_date_and_timestamp_decode() {
        assert_eq!(
            decode(DataType::Date, "2024-02-29").unwrap(),
            BindValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(matches!(
            decode(DataType::Timestamp, "2024-02-29T10:30:00Z").unwrap(),
            BindValue::Timestamp(_)
        ));
        assert!(matches!(
            decode(DataType::Timestamp, "2024-02-29 10:30:00.25").unwrap(),
            BindValue::Timestamp(_)
        ));
    }

    #[test]
    fn test_json_decode() {
        let v = decode(DataType::Json, r#"{"k": 1}"#).unwrap();
        assert_eq!(v, BindValue::Json(serde_json::json!({"k": 1})));
    }

    #[test]
    fn test_malformed_scalar_names_the_parameter() {
        let err = BindValue::decode(&param("count", DataType::Integer), "twelve").unwrap_err();
        match err {
            EngineError::BindDecode { name, .. } => assert_eq!(name, "count"),
            other => panic!("expected bind decode error, got {other:?}"),
        }
        assert!(decode(DataType::Boolean, "yes").is_err());
        assert!(decode(DataType::Guid, "not-a-guid").is_err());
        assert!(decode(DataType::Date, "02/29/2024").is_err());
        assert!(decode(DataType::Timestamp, "noonish").is_err());
    }

    // --- array decoding ---

    #[test]
    fn test_array_varchar_decode() {
        let v = decode(DataType::ArrayVarchar, r#"["CA","TX"]"#).unwrap();
        assert_eq!(v, BindValue::TextArray(vec!["CA".into(), "TX".into()]));
    }

    #[test]
    fn test_array_integer_decode() {
        let v = decode(DataType::ArrayInteger, "[1,2,3]").unwrap();
        assert_eq!(v, BindValue::Int4Array(vec![1, 2, 3]));
    }

    #[test]
    fn test_array_date_decode() {
        let v = decode(DataType::ArrayDate, r#"["2024-01-01","2024-06-15"]"#).unwrap();
        assert_eq!(
            v,
            BindValue::DateArray(vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            ])
        );
    }

    #[test]
    fn test_malformed_array_names_the_parameter() {
        let err =
            BindValue::decode(&param("states", DataType::ArrayVarchar), r#"["CA","#).unwrap_err();
        match err {
            EngineError::BindDecode { name, .. } => assert_eq!(name, "states"),
            other => panic!("expected bind decode error, got {other:?}"),
        }
        assert!(decode(DataType::ArrayInteger, r#"["a"]"#).is_err());
        assert!(decode(DataType::ArrayDate, r#"["yesterday"]"#).is_err());
    }

    // --- named bind set ---

    #[test]
    fn test_bind_decodes_every_declared_parameter() {
        let d = def(
            "select * from t where id={id} and state = any({states})",
            vec![param("id", DataType::Integer), param("states", DataType::ArrayVarchar)],
        );
        let mut call = HashMap::new();
        call.insert("id".to_string(), "7".to_string());
        call.insert("states".to_string(), r#"["CA","TX"]"#.to_string());

        let binds = NamedBindSet::bind(&d, &call).unwrap();
        assert_eq!(binds.len(), 2);
        assert_eq!(binds.get("id"), Some(&BindValue::Int4(7)));
        assert_eq!(
            binds.get("states"),
            Some(&BindValue::TextArray(vec!["CA".into(), "TX".into()]))
        );
    }

    #[test]
    fn test_absent_optional_parameter_binds_typed_null() {
        let mut p = param("limit", DataType::Integer);
        p.optional = true;
        let d = def("select * from t where x={limit}", vec![p]);
        let binds = NamedBindSet::bind(&d, &HashMap::new()).unwrap();
        // The NULL carries the declared type, not a generic text NULL, so
        // the driver binds it against an integer placeholder.
        assert_eq!(binds.get("limit"), Some(&BindValue::Null(DataType::Integer)));

        let stmt = BoundStatement::prepare(&d, &binds).unwrap();
        assert_eq!(stmt.sql_params().len(), 1);
    }

    #[test]
    fn test_typed_nulls_for_non_text_types() {
        use tokio_postgres::types::{IsNull, Type};

        // A NULL for an INTEGER parameter must encode against an int4
        // placeholder; a text NULL would fail the driver's type check there.
        let mut buf = bytes::BytesMut::new();
        let is_null = null_sql(DataType::Integer)
            .to_sql_checked(&Type::INT4, &mut buf)
            .unwrap();
        assert!(matches!(is_null, IsNull::Yes));

        assert!(null_sql(DataType::Guid)
            .to_sql_checked(&Type::UUID, &mut buf)
            .is_ok());
        assert!(null_sql(DataType::ArrayVarchar)
            .to_sql_checked(&Type::TEXT_ARRAY, &mut buf)
            .is_ok());
        assert!(null_sql(DataType::Integer)
            .to_sql_checked(&Type::TEXT, &mut buf)
            .is_err());
    }

    // --- statement rewrite ---

    #[test]
    fn test_prepare_rewrites_placeholders_to_ordinals() {
        let d = def(
            "select * from t where id={id} and state={state}",
            vec![param("id", DataType::Integer), param("state", DataType::String)],
        );
        let mut call = HashMap::new();
        call.insert("id".to_string(), "1".to_string());
        call.insert("state".to_string(), "CA".to_string());

        let binds = NamedBindSet::bind(&d, &call).unwrap();
        let stmt = BoundStatement::prepare(&d, &binds).unwrap();
        assert_eq!(stmt.sql, "select * from t where id=$1 and state=$2");
        assert_eq!(stmt.param_count(), 2);
        assert_eq!(stmt.sql_params().len(), 2);
    }

    #[test]
    fn test_repeated_placeholder_shares_one_ordinal() {
        let d = def(
            "select * from t where a={id} or b={id}",
            vec![param("id", DataType::Integer)],
        );
        let mut call = HashMap::new();
        call.insert("id".to_string(), "1".to_string());

        let binds = NamedBindSet::bind(&d, &call).unwrap();
        let stmt = BoundStatement::prepare(&d, &binds).unwrap();
        assert_eq!(stmt.sql, "select * from t where a=$1 or b=$1");
        assert_eq!(stmt.param_count(), 1);
    }

    #[test]
    fn test_prepare_with_no_placeholders_is_identity() {
        let d = def("select count(*) from t", vec![]);
        let stmt = BoundStatement::prepare(&d, &NamedBindSet::default()).unwrap();
        assert_eq!(stmt.sql, "select count(*) from t");
        assert_eq!(stmt.param_count(), 0);
    }
}
