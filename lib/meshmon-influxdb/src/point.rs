//! Measurement points and their line-protocol encoding.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use meshmon_database::{EmptyFields, InsertError};
use snafu::ensure;

/// A typed field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// An integer field.
    Integer(i64),

    /// A floating point field.
    Float(f64),

    /// A boolean field.
    Boolean(bool),

    /// A string field.
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Field keys and values carried by one point.
pub type FieldSet = Vec<(&'static str, FieldValue)>;

/// An ordered set of tags with unique keys.
///
/// Values are rewritten to a wire-safe form on insertion, so a constructed set never
/// carries characters that would corrupt the line-oriented wire format.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagSet(Vec<(String, String)>);

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` if the set holds no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of tags in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Inserts a tag, sanitizing its value.
    ///
    /// If a tag with the same key is already present, the set is unchanged: whoever
    /// inserts a key first owns it.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: AsRef<str>,
    {
        let key = key.into();
        if self.contains_key(&key) {
            return;
        }

        self.0.push((key, sanitize_tag_value(value.as_ref())));
    }

    /// Returns `true` if a tag with the given key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(existing, _)| existing == key)
    }

    /// Returns the value of the tag with the given key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over the tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Rewrites a raw tag value into a wire-safe form.
///
/// Every control character (including tab, line feed, and carriage return) and every
/// Unicode space or separator other than plain ASCII space becomes a single ASCII
/// space. All other code points, including multi-byte printable symbols, pass through
/// unchanged.
pub fn sanitize_tag_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_control() || (c.is_whitespace() && c != ' ') {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// An immutable measurement sample, ready to be queued for writing.
#[derive(Clone, Debug)]
pub struct MetricPoint {
    measurement: &'static str,
    tags: TagSet,
    fields: FieldSet,
    timestamp: SystemTime,
}

impl MetricPoint {
    /// Builds a point from event-specific tags and fields plus the connection's
    /// globally configured tags.
    ///
    /// Origin tags always win: a global tag is applied only when the origin set does
    /// not already carry its key. Operators can thus label every point a connection
    /// writes with site or deployment metadata without overriding the identity tags
    /// supplied per event. Global tag values are sanitized like origin values.
    ///
    /// # Errors
    ///
    /// An empty field set fails with [`InsertError::EmptyFields`]: every point must
    /// carry at least one measured value.
    pub fn build(
        measurement: &'static str, mut tags: TagSet, fields: FieldSet, timestamp: SystemTime,
        global_tags: &BTreeMap<String, String>,
    ) -> Result<Self, InsertError> {
        ensure!(!fields.is_empty(), EmptyFields { measurement });

        for (key, value) in global_tags {
            tags.insert(key.clone(), value);
        }

        Ok(Self {
            measurement,
            tags,
            fields,
            timestamp,
        })
    }

    /// Returns the measurement this point belongs to.
    pub fn measurement(&self) -> &'static str {
        self.measurement
    }

    /// Returns the point's tags.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the point's fields.
    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    /// Appends the point's line-protocol representation to `out`.
    ///
    /// Shape: `measurement,tag=value field=value timestamp`, with the timestamp in
    /// nanoseconds since the Unix epoch.
    pub fn encode_to(&self, out: &mut String) {
        escape_measurement(self.measurement, out);

        for (key, value) in self.tags.iter() {
            out.push(',');
            escape_tag(key, out);
            out.push('=');
            escape_tag(value, out);
        }

        out.push(' ');
        for (idx, (key, value)) in self.fields.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            escape_tag(key, out);
            out.push('=');
            match value {
                FieldValue::Integer(v) => write!(out, "{}i", v).unwrap(),
                FieldValue::Float(v) => write!(out, "{}", v).unwrap(),
                FieldValue::Boolean(v) => out.push_str(if *v { "true" } else { "false" }),
                FieldValue::Text(v) => {
                    out.push('"');
                    escape_string_field(v, out);
                    out.push('"');
                }
            }
        }

        write!(out, " {}", self.unix_nanos()).unwrap();
    }

    fn unix_nanos(&self) -> u128 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos()
    }
}

fn escape_measurement(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if c == ',' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_tag(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if c == ',' || c == '=' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_string_field(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_global_tags() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn single_field() -> FieldSet {
        vec![("clients.total", FieldValue::Integer(10))]
    }

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(
            sanitize_tag_value("\u{a0}this owner\nuses invalid chars\t"),
            " this owner uses invalid chars "
        );
    }

    #[test]
    fn sanitize_keeps_valid_characters() {
        let value = "📶this owner uses only\u{20}valid chars🛜";
        assert_eq!(sanitize_tag_value(value), value);
    }

    #[test]
    fn sanitize_replaces_unicode_separators() {
        // Em space (Zs) and line separator (Zl) are separators, not controls.
        assert_eq!(sanitize_tag_value("a\u{2003}b\u{2028}c"), "a b c");
    }

    #[test]
    fn global_tag_applied_when_absent() {
        let mut global_tags = BTreeMap::new();
        global_tags.insert("testtag".to_string(), "value".to_string());

        let point = MetricPoint::build(
            "name",
            TagSet::new(),
            single_field(),
            SystemTime::UNIX_EPOCH,
            &global_tags,
        )
        .expect("point has fields");

        assert_eq!(point.tags().get("testtag"), Some("value"));
        assert_eq!(point.tags().get("testtag2"), None);
    }

    #[test]
    fn origin_tag_wins_over_global_tag() {
        let mut global_tags = BTreeMap::new();
        global_tags.insert("nodeid".to_string(), "value".to_string());

        let mut tags = TagSet::new();
        tags.insert("nodeid", "collected");

        let point = MetricPoint::build(
            "name",
            tags,
            single_field(),
            SystemTime::UNIX_EPOCH,
            &global_tags,
        )
        .expect("point has fields");

        assert_eq!(point.tags().get("nodeid"), Some("collected"));
    }

    #[test]
    fn global_tag_values_sanitized() {
        let mut global_tags = BTreeMap::new();
        global_tags.insert("site".to_string(), "two\nlines".to_string());

        let point = MetricPoint::build(
            "name",
            TagSet::new(),
            single_field(),
            SystemTime::UNIX_EPOCH,
            &global_tags,
        )
        .expect("point has fields");

        assert_eq!(point.tags().get("site"), Some("two lines"));
    }

    #[test]
    fn empty_field_set_rejected() {
        let mut tags = TagSet::new();
        tags.insert("nodeid", "c0ffee");

        match MetricPoint::build("name", tags, Vec::new(), SystemTime::UNIX_EPOCH, &no_global_tags()) {
            Err(InsertError::EmptyFields { measurement }) => assert_eq!(measurement, "name"),
            _ => panic!("expected empty field set to be rejected"),
        }
    }

    #[test]
    fn encode_basic_point() {
        let mut tags = TagSet::new();
        tags.insert("nodeid", "c0ffee");

        let fields = vec![
            ("clients.total", FieldValue::Integer(10)),
            ("load", FieldValue::Float(0.5)),
            ("online", FieldValue::Boolean(true)),
        ];

        let timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let point = MetricPoint::build("node", tags, fields, timestamp, &no_global_tags())
            .expect("point has fields");

        let mut line = String::new();
        point.encode_to(&mut line);

        assert_eq!(
            line,
            "node,nodeid=c0ffee clients.total=10i,load=0.5,online=true 1000000000"
        );
    }

    #[test]
    fn encode_escapes_tag_values() {
        let mut tags = TagSet::new();
        tags.insert("hostname", "node one,two=three");

        let point = MetricPoint::build(
            "node",
            tags,
            single_field(),
            SystemTime::UNIX_EPOCH,
            &no_global_tags(),
        )
        .expect("point has fields");

        let mut line = String::new();
        point.encode_to(&mut line);

        assert_eq!(
            line,
            "node,hostname=node\\ one\\,two\\=three clients.total=10i 0"
        );
    }

    #[test]
    fn encode_escapes_string_fields() {
        let fields = vec![("note", FieldValue::Text("say \"hi\" \\ bye".to_string()))];

        let point = MetricPoint::build(
            "node",
            TagSet::new(),
            fields,
            SystemTime::UNIX_EPOCH,
            &no_global_tags(),
        )
        .expect("point has fields");

        let mut line = String::new();
        point.encode_to(&mut line);

        assert_eq!(line, "node note=\"say \\\"hi\\\" \\\\ bye\" 0");
    }

    #[test]
    fn tag_set_keeps_first_insertion() {
        let mut tags = TagSet::new();
        tags.insert("nodeid", "first");
        tags.insert("nodeid", "second");

        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("nodeid"), Some("first"));
    }
}
