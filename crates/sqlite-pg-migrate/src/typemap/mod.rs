//! Type mapping from SQLite declared types to PostgreSQL.
//!
//! Resolution is a small rule chain. Explicit table/column overrides are
//! consulted first and, when present, are final. Otherwise the declared type's
//! keyword is classified into a [`TypeFamily`] and the family's target type is
//! used. Anything unrecognized becomes `TEXT`.

mod default_value;

pub use default_value::{format_default, is_boolean_target, is_numeric_target};

use std::collections::BTreeMap;

use crate::config::MappingConfig;

/// Target type used when no rule matches.
pub const FALLBACK_TYPE: &str = "TEXT";

/// Target type for the floating and decimal family.
pub const DECIMAL_TARGET: &str = "NUMERIC(10,2)";

/// Broad classes of SQLite declared types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Decimal,
    Character,
    Timestamp,
    Date,
    Time,
    Binary,
    Boolean,
    Json,
}

impl TypeFamily {
    /// Classify a lowercase type keyword.
    pub fn of_keyword(keyword: &str) -> Option<Self> {
        let family = match keyword {
            "integer" | "int" | "bigint" | "smallint" | "tinyint" | "mediumint" | "int2"
            | "int4" | "int8" => TypeFamily::Integer,
            "real" | "float" | "double" | "double precision" | "numeric" | "decimal" => {
                TypeFamily::Decimal
            }
            "text" | "varchar" | "char" | "character" | "character varying" | "nvarchar"
            | "nchar" | "varying character" | "native character" | "clob" => {
                TypeFamily::Character
            }
            "datetime" | "timestamp" => TypeFamily::Timestamp,
            "date" => TypeFamily::Date,
            "time" => TypeFamily::Time,
            "blob" => TypeFamily::Binary,
            "boolean" | "bool" => TypeFamily::Boolean,
            "json" => TypeFamily::Json,
            _ => return None,
        };
        Some(family)
    }

    /// Classify a declared type string.
    pub fn of(declared: &str) -> Option<Self> {
        SourceType::parse(declared).family()
    }
}

/// A declared type split into keyword and parenthesized arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceType {
    /// Lowercase text before any `(`, whitespace collapsed.
    pub keyword: String,
    /// Text inside the first parentheses, trimmed.
    pub args: Option<String>,
}

impl SourceType {
    pub fn parse(declared: &str) -> Self {
        let lower = declared.trim().to_lowercase();
        let (head, args) = match lower.find('(') {
            Some(open) => {
                let rest = &lower[open + 1..];
                let inner = rest.find(')').map_or(rest, |close| &rest[..close]);
                (&lower[..open], Some(inner.trim().to_string()))
            }
            None => (lower.as_str(), None),
        };
        let keyword = head.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            keyword,
            args: args.filter(|a| !a.is_empty()),
        }
    }

    /// Family of the full keyword, else of its first word.
    pub fn family(&self) -> Option<TypeFamily> {
        TypeFamily::of_keyword(&self.keyword).or_else(|| {
            self.keyword
                .split(' ')
                .next()
                .and_then(TypeFamily::of_keyword)
        })
    }
}

/// One step of the mapping chain.
pub trait TypeRule: Send + Sync {
    /// Target type if this rule decides the column, `None` to defer.
    fn apply(&self, source: &SourceType, table: &str, column: &str) -> Option<String>;
}

/// Exact table/column overrides.
#[derive(Debug, Clone, Default)]
pub struct OverrideRule {
    overrides: BTreeMap<String, BTreeMap<String, String>>,
}

impl OverrideRule {
    pub fn new(overrides: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { overrides }
    }

    /// Override for a column, if any.
    pub fn lookup(&self, table: &str, column: &str) -> Option<&str> {
        self.overrides
            .get(table)
            .and_then(|cols| cols.get(column))
            .map(String::as_str)
    }
}

impl TypeRule for OverrideRule {
    fn apply(&self, _source: &SourceType, table: &str, column: &str) -> Option<String> {
        self.lookup(table, column).map(str::to_string)
    }
}

/// Maps one [`TypeFamily`] to its PostgreSQL type.
#[derive(Debug, Clone, Copy)]
pub struct FamilyRule(pub TypeFamily);

impl TypeRule for FamilyRule {
    fn apply(&self, source: &SourceType, _table: &str, _column: &str) -> Option<String> {
        if source.family() != Some(self.0) {
            return None;
        }
        let target = match self.0 {
            TypeFamily::Integer => "BIGINT".to_string(),
            TypeFamily::Decimal => DECIMAL_TARGET.to_string(),
            TypeFamily::Character => match source.args.as_deref().and_then(char_length) {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            TypeFamily::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
            TypeFamily::Date => "DATE".to_string(),
            TypeFamily::Time => "TIME".to_string(),
            TypeFamily::Binary => "BYTEA".to_string(),
            TypeFamily::Boolean => "BOOLEAN".to_string(),
            TypeFamily::Json => "JSONB".to_string(),
        };
        Some(target)
    }
}

/// Declared length, when it is a positive integer.
fn char_length(args: &str) -> Option<u32> {
    args.parse::<u32>().ok().filter(|n| *n > 0)
}

/// Ordered rule chain resolving source column types.
pub struct TypeMapper {
    overrides: OverrideRule,
    rules: Vec<Box<dyn TypeRule>>,
}

impl TypeMapper {
    /// Mapper with the given overrides and the built-in family rules.
    pub fn new(overrides: OverrideRule) -> Self {
        let families = [
            TypeFamily::Integer,
            TypeFamily::Decimal,
            TypeFamily::Character,
            TypeFamily::Timestamp,
            TypeFamily::Date,
            TypeFamily::Time,
            TypeFamily::Binary,
            TypeFamily::Boolean,
            TypeFamily::Json,
        ];
        Self {
            overrides,
            rules: families
                .into_iter()
                .map(|f| Box::new(FamilyRule(f)) as Box<dyn TypeRule>)
                .collect(),
        }
    }

    /// Mapper built from the `mapping` configuration section.
    pub fn from_config(mapping: &MappingConfig) -> Self {
        Self::new(OverrideRule::new(mapping.type_overrides.clone()))
    }

    /// Insert a rule ahead of the built-in family rules.
    pub fn with_rule(mut self, rule: Box<dyn TypeRule>) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Whether an explicit override exists for the column.
    pub fn has_override(&self, table: &str, column: &str) -> bool {
        self.overrides.lookup(table, column).is_some()
    }

    /// Resolve the PostgreSQL type for a source column.
    pub fn resolve(&self, source_type: &str, table: &str, column: &str) -> String {
        if let Some(target) = self.overrides.lookup(table, column) {
            return target.to_string();
        }
        let source = SourceType::parse(source_type);
        self.rules
            .iter()
            .find_map(|rule| rule.apply(&source, table, column))
            .unwrap_or_else(|| FALLBACK_TYPE.to_string())
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(OverrideRule::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper_with(table: &str, column: &str, target: &str) -> TypeMapper {
        let mut cols = BTreeMap::new();
        cols.insert(column.to_string(), target.to_string());
        let mut overrides = BTreeMap::new();
        overrides.insert(table.to_string(), cols);
        TypeMapper::new(OverrideRule::new(overrides))
    }

    #[test]
    fn test_integer_family() {
        let m = TypeMapper::default();
        for t in ["INTEGER", "int", "BIGINT", "smallint", "tinyint(1)"] {
            assert_eq!(m.resolve(t, "t", "c"), "BIGINT", "{}", t);
        }
    }

    #[test]
    fn test_decimal_family() {
        let m = TypeMapper::default();
        for t in ["REAL", "float", "DOUBLE", "double precision", "numeric", "DECIMAL(18,4)"] {
            assert_eq!(m.resolve(t, "t", "c"), "NUMERIC(10,2)", "{}", t);
        }
    }

    #[test]
    fn test_character_family_preserves_length() {
        let m = TypeMapper::default();
        assert_eq!(m.resolve("varchar(255)", "t", "c"), "VARCHAR(255)");
        assert_eq!(m.resolve("CHAR(32)", "t", "c"), "VARCHAR(32)");
        assert_eq!(m.resolve("character varying(20)", "t", "c"), "VARCHAR(20)");
        assert_eq!(m.resolve("varchar", "t", "c"), "TEXT");
        assert_eq!(m.resolve("text", "t", "c"), "TEXT");
    }

    #[test]
    fn test_temporal_binary_boolean_json() {
        let m = TypeMapper::default();
        assert_eq!(m.resolve("datetime", "t", "c"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(m.resolve("TIMESTAMP", "t", "c"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(m.resolve("date", "t", "c"), "DATE");
        assert_eq!(m.resolve("time", "t", "c"), "TIME");
        assert_eq!(m.resolve("blob", "t", "c"), "BYTEA");
        assert_eq!(m.resolve("Boolean", "t", "c"), "BOOLEAN");
        assert_eq!(m.resolve("bool", "t", "c"), "BOOLEAN");
        assert_eq!(m.resolve("JSON", "t", "c"), "JSONB");
    }

    #[test]
    fn test_unknown_falls_back_to_text() {
        let m = TypeMapper::default();
        assert_eq!(m.resolve("", "t", "c"), "TEXT");
        assert_eq!(m.resolve("geometry", "t", "c"), "TEXT");
        assert_eq!(m.resolve("unsigned big int", "t", "c"), "TEXT");
    }

    #[test]
    fn test_override_dominates_any_source_type() {
        let m = mapper_with("channels", "only_chat", "BOOLEAN");
        for t in ["integer", "text", "", "blob", "numeric(5,2)"] {
            assert_eq!(m.resolve(t, "channels", "only_chat"), "BOOLEAN");
        }
        // Same column name in another table is not overridden.
        assert_eq!(m.resolve("integer", "logs", "only_chat"), "BIGINT");
        assert!(m.has_override("channels", "only_chat"));
        assert!(!m.has_override("channels", "status"));
    }

    #[test]
    fn test_custom_rule_runs_before_families() {
        struct UuidRule;
        impl TypeRule for UuidRule {
            fn apply(&self, source: &SourceType, _t: &str, _c: &str) -> Option<String> {
                (source.keyword == "uuid").then(|| "UUID".to_string())
            }
        }
        let m = TypeMapper::default().with_rule(Box::new(UuidRule));
        assert_eq!(m.resolve("UUID", "t", "c"), "UUID");
        assert_eq!(m.resolve("int", "t", "c"), "BIGINT");
    }

    #[test]
    fn test_source_type_parse() {
        let st = SourceType::parse("  NUMERIC ( 10, 2 ) ");
        assert_eq!(st.keyword, "numeric");
        assert_eq!(st.args.as_deref(), Some("10, 2"));
        assert_eq!(st.family(), Some(TypeFamily::Decimal));
        assert_eq!(TypeFamily::of("VARCHAR(32)"), Some(TypeFamily::Character));
        assert_eq!(TypeFamily::of("geometry"), None);
    }
}
