use serde::{Deserialize, Serialize};

use crate::model::{DataType, MethodType};

/// One named input a statement accepts. Non-optional parameters must be
/// supplied on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryParameter {
    pub name: String,
    #[serde(rename = "Type")]
    pub data_type: DataType,
    #[serde(default)]
    pub optional: bool,
}

/// One callable method: its identity, declared parameters, templated
/// statement text, and enablement/authorization tags.
///
/// `(service_name, method_name)` is the logical identity used for lookup.
/// `auth_required` holds opaque policy tags resolved by the service author's
/// tag-to-policy mapping; the engine never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MethodDefinition {
    pub enabled: bool,
    #[serde(default)]
    pub auth_required: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example_call: String,
    pub service_name: String,
    pub method_name: String,
    pub method_type: MethodType,
    pub query: String,
    #[serde(default)]
    pub query_parameters: Vec<QueryParameter>,
}

impl MethodDefinition {
    /// Names of all declared parameters, in declaration order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.query_parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Names of the parameters that must be supplied on every call.
    pub fn required_parameter_names(&self) -> Vec<&str> {
        self.query_parameters
            .iter()
            .filter(|p| !p.optional)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Cross-check the declared parameters against the placeholders actually
    /// present in the statement text.
    ///
    /// Every declared name must appear as a placeholder, and the distinct
    /// placeholder count must equal the declared parameter count. A
    /// definition with no parameters and no placeholders is valid. Failures
    /// are logged, never raised; an invalid definition is simply dropped
    /// from the catalog by the loader.
    pub fn validate(&self) -> bool {
        let in_query = placeholder_names(&self.query);

        let mut names_ok = true;
        for param in &self.query_parameters {
            if !in_query.iter().any(|n| n == &param.name) {
                tracing::error!(
                    service = %self.service_name,
                    method = %self.method_name,
                    param = %param.name,
                    "found query definition with param name inconsistency in the queries file"
                );
                names_ok = false;
            }
        }
        if !names_ok {
            return false;
        }

        if in_query.is_empty() && self.query_parameters.is_empty() {
            tracing::info!(query = %self.query, "added query with no parameters");
            return true;
        }

        if in_query.len() == self.query_parameters.len() {
            tracing::info!(query = %self.query, "added query with matching parameter count");
            return true;
        }

        tracing::error!(
            service = %self.service_name,
            method = %self.method_name,
            query = %self.query,
            expected = self.query_parameters.len(),
            found = in_query.len(),
            "found query definition with inconsistent param count in the queries file"
        );
        false
    }
}

/// A `{name}` placeholder occurrence in a statement template: the byte range
/// of the whole token (braces included) and the name inside it.
pub(crate) struct Placeholder<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
}

/// Scan the statement text for `{name}` placeholders, in order of
/// occurrence. A name is one alphanumeric character, or alphanumerics with
/// interior `_`/`-` separators; anything else between braces is left alone.
pub(crate) fn placeholders(query: &str) -> Vec<Placeholder<'_>> {
    let bytes = query.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = scan_name(bytes, i + 1) {
                found.push(Placeholder {
                    start: i,
                    end: close + 1,
                    name: &query[i + 1..close],
                });
                i = close + 1;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Distinct placeholder names, in first-occurrence order.
pub(crate) fn placeholder_names(query: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for ph in placeholders(query) {
        if !names.iter().any(|n| n == ph.name) {
            names.push(ph.name.to_string());
        }
    }
    names
}

/// Starting just after a `{`, return the index of the closing `}` if the
/// bytes up to it form a valid placeholder name.
fn scan_name(bytes: &[u8], start: usize) -> Option<usize> {
    let mut j = start;
    while j < bytes.len() && is_name_byte(bytes[j]) {
        j += 1;
    }
    if j == start || j >= bytes.len() || bytes[j] != b'}' {
        return None;
    }
    // No leading or trailing separators.
    if !bytes[start].is_ascii_alphanumeric() || !bytes[j - 1].is_ascii_alphanumeric() {
        return None;
    }
    Some(j)
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(query: &str, params: &[(&str, bool)]) -> MethodDefinition {
        MethodDefinition {
            enabled: true,
            auth_required: vec![],
            description: String::new(),
            example_call: String::new(),
            service_name: "unittests".into(),
            method_name: "m".into(),
            method_type: MethodType::StandaloneRequest,
            query: query.into(),
            query_parameters: params
                .iter()
                .map(|(name, optional)| QueryParameter {
                    name: (*name).into(),
                    data_type: DataType::String,
                    optional: *optional,
                })
                .collect(),
        }
    }

    // --- placeholder tokenizer ---

    #[test]
    fn test_extracts_simple_placeholders() {
        let names = placeholder_names("select * from t where a={id} and b={state}");
        assert_eq!(names, vec!["id", "state"]);
    }

    #[test]
    fn test_single_character_name_is_valid() {
        assert_eq!(placeholder_names("select {x}"), vec!["x"]);
    }

    #[test]
    fn test_interior_separators_are_valid() {
        assert_eq!(
            placeholder_names("select {owner_id}, {zip-code}"),
            vec!["owner_id", "zip-code"]
        );
    }

    #[test]
    fn test_leading_or_trailing_separators_are_not_placeholders() {
        assert!(placeholder_names("select {_id}").is_empty());
        assert!(placeholder_names("select {id_}").is_empty());
        assert!(placeholder_names("select {-id}, {id-}").is_empty());
    }

    #[test]
    fn test_empty_and_malformed_braces_are_not_placeholders() {
        assert!(placeholder_names("select {} from {a b}").is_empty());
        assert!(placeholder_names("select '{\"k\": 1}'::jsonb").is_empty());
    }

    #[test]
    fn test_repeated_name_reported_once() {
        assert_eq!(
            placeholder_names("select * from t where a={id} or b={id}"),
            vec!["id"]
        );
    }

    #[test]
    fn test_unclosed_brace_followed_by_valid_placeholder() {
        assert_eq!(placeholder_names("select {bad {id}"), vec!["id"]);
    }

    #[test]
    fn test_placeholder_ranges_cover_braces() {
        let query = "a={id}";
        let ph = &placeholders(query)[0];
        assert_eq!(&query[ph.start..ph.end], "{id}");
    }

    // --- validation ---

    #[test]
    fn test_matching_names_and_counts_validate() {
        let d = def(
            "select * from t where id={id} and state={state}",
            &[("id", false), ("state", true)],
        );
        assert!(d.validate());
    }

    #[test]
    fn test_zero_parameters_and_zero_placeholders_validate() {
        let d = def("select count(*) from t", &[]);
        assert!(d.validate());
    }

    #[test]
    fn test_declared_name_missing_from_query_fails() {
        let d = def("select * from t where id={id}", &[("id", false), ("state", false)]);
        assert!(!d.validate());
    }

    #[test]
    fn test_placeholder_count_exceeding_declared_fails() {
        let d = def(
            "select * from t where id={id} and state={state}",
            &[("id", false)],
        );
        assert!(!d.validate());
    }

    #[test]
    fn test_placeholders_with_no_declared_parameters_fail() {
        let d = def("select * from t where id={id}", &[]);
        assert!(!d.validate());
    }

    #[test]
    fn test_repeated_placeholder_counts_once() {
        let d = def(
            "select * from t where a={id} or b={id}",
            &[("id", false)],
        );
        assert!(d.validate());
    }

    // --- parameter name helpers ---

    #[test]
    fn test_required_parameter_names_filter_optional() {
        let d = def(
            "select * from t where id={id} and state={state}",
            &[("id", false), ("state", true)],
        );
        assert_eq!(d.parameter_names(), vec!["id", "state"]);
        assert_eq!(d.required_parameter_names(), vec!["id"]);
    }

    // --- serde surface ---

    #[test]
    fn test_definition_decodes_from_queries_file_shape() {
        let raw = r#"{
            "Enabled": true,
            "AuthRequired": ["machine realm: valid identity"],
            "Description": "fetch one row by id",
            "ExampleCall": "/v1/queries/unittests/getJsonById?id=1",
            "ServiceName": "unittests",
            "MethodName": "getJsonById",
            "MethodType": "STANDALONE_REQUEST",
            "Query": "select data as aJson from t where id={id}",
            "QueryParameters": [
                {"Name": "id", "Type": "STRING", "Optional": false}
            ]
        }"#;
        let d: MethodDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(d.service_name, "unittests");
        assert_eq!(d.method_name, "getJsonById");
        assert_eq!(d.query_parameters.len(), 1);
        assert_eq!(d.query_parameters[0].data_type, DataType::String);
        assert!(!d.query_parameters[0].optional);
        assert!(d.validate());
    }

    #[test]
    fn test_unknown_enum_token_fails_definition_decode() {
        let raw = r#"{
            "Enabled": true,
            "ServiceName": "unittests",
            "MethodName": "m",
            "MethodType": "STANDALONE_REQUEST",
            "Query": "select 1 where a={a}",
            "QueryParameters": [{"Name": "a", "Type": "CITEXT"}]
        }"#;
        assert!(serde_json::from_str::<MethodDefinition>(raw).is_err());
    }
}
