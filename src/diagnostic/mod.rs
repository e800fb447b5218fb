//! Static registry of diagnostic rules
//!
//! Each rule is a row of pure data: where it runs, which query resource it
//! loads and which parameters the query takes. Merge behavior for rules that
//! run across the cluster lives separately in `check::merge`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HealthError;

/// Where a rule has to be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTopology {
    /// Only on the current primary
    OnPrimary,
    /// On every cluster member, results merged afterwards
    AcrossCluster,
}

/// Positional parameters a rule query expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryParams {
    /// `$1` schema name
    Schema,
    /// `$1` schema name, `$2` bloat percentage threshold
    SchemaWithBloatThreshold,
    /// `$1` schema name, `$2` remaining percentage threshold
    SchemaWithRemainingPercentageThreshold,
}

/// Diagnostic rule identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    BloatedIndexes,
    BloatedTables,
    DuplicatedIndexes,
    ForeignKeysWithoutIndex,
    IndexesWithNullValues,
    IntersectedIndexes,
    InvalidIndexes,
    TablesWithMissingIndexes,
    TablesWithoutPrimaryKey,
    UnusedIndexes,
    TablesWithoutDescription,
    ColumnsWithoutDescription,
    ColumnsWithJsonType,
    ColumnsWithSerialTypes,
    FunctionsWithoutDescription,
    IndexesWithBoolean,
    NotValidConstraints,
    BtreeIndexesOnArrayColumns,
    SequenceOverflow,
    PrimaryKeysWithSerialTypes,
    DuplicatedForeignKeys,
    IntersectedForeignKeys,
    PossibleObjectNameOverflow,
    TablesNotLinkedToOthers,
    ForeignKeysWithUnmatchedColumnType,
    TablesWithZeroOrOneColumn,
    ObjectsNotFollowingNamingConvention,
}

/// One registry row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticInfo {
    pub diagnostic: Diagnostic,
    pub id: &'static str,
    pub topology: ExecutionTopology,
    pub query_resource: &'static str,
    pub params: QueryParams,
    /// Statistics based; only meaningful on a database with real traffic
    pub runtime: bool,
}

const fn rule(
    diagnostic: Diagnostic,
    id: &'static str,
    query_resource: &'static str,
) -> DiagnosticInfo {
    DiagnosticInfo {
        diagnostic,
        id,
        topology: ExecutionTopology::OnPrimary,
        query_resource,
        params: QueryParams::Schema,
        runtime: false,
    }
}

const fn runtime_rule(
    diagnostic: Diagnostic,
    id: &'static str,
    query_resource: &'static str,
    topology: ExecutionTopology,
    params: QueryParams,
) -> DiagnosticInfo {
    DiagnosticInfo {
        diagnostic,
        id,
        topology,
        query_resource,
        params,
        runtime: true,
    }
}

use Diagnostic::*;
use ExecutionTopology::{AcrossCluster, OnPrimary};

/// Every rule, in declaration order of `Diagnostic`
#[rustfmt::skip]
pub static REGISTRY: [DiagnosticInfo; 27] = [
    runtime_rule(BloatedIndexes, "bloated_indexes", "bloated_indexes.sql", OnPrimary, QueryParams::SchemaWithBloatThreshold),
    runtime_rule(BloatedTables, "bloated_tables", "bloated_tables.sql", OnPrimary, QueryParams::SchemaWithBloatThreshold),
    rule(DuplicatedIndexes, "duplicated_indexes", "duplicated_indexes.sql"),
    rule(ForeignKeysWithoutIndex, "foreign_keys_without_index", "foreign_keys_without_index.sql"),
    rule(IndexesWithNullValues, "indexes_with_null_values", "indexes_with_null_values.sql"),
    rule(IntersectedIndexes, "intersected_indexes", "intersected_indexes.sql"),
    rule(InvalidIndexes, "invalid_indexes", "invalid_indexes.sql"),
    runtime_rule(TablesWithMissingIndexes, "tables_with_missing_indexes", "tables_with_missing_indexes.sql", AcrossCluster, QueryParams::Schema),
    rule(TablesWithoutPrimaryKey, "tables_without_primary_key", "tables_without_primary_key.sql"),
    runtime_rule(UnusedIndexes, "unused_indexes", "unused_indexes.sql", AcrossCluster, QueryParams::Schema),
    rule(TablesWithoutDescription, "tables_without_description", "tables_without_description.sql"),
    rule(ColumnsWithoutDescription, "columns_without_description", "columns_without_description.sql"),
    rule(ColumnsWithJsonType, "columns_with_json_type", "columns_with_json_type.sql"),
    rule(ColumnsWithSerialTypes, "columns_with_serial_types", "columns_with_serial_types.sql"),
    rule(FunctionsWithoutDescription, "functions_without_description", "functions_without_description.sql"),
    rule(IndexesWithBoolean, "indexes_with_boolean", "indexes_with_boolean.sql"),
    rule(NotValidConstraints, "not_valid_constraints", "not_valid_constraints.sql"),
    rule(BtreeIndexesOnArrayColumns, "btree_indexes_on_array_columns", "btree_indexes_on_array_columns.sql"),
    runtime_rule(SequenceOverflow, "sequence_overflow", "sequence_overflow.sql", OnPrimary, QueryParams::SchemaWithRemainingPercentageThreshold),
    rule(PrimaryKeysWithSerialTypes, "primary_keys_with_serial_types", "primary_keys_with_serial_types.sql"),
    rule(DuplicatedForeignKeys, "duplicated_foreign_keys", "duplicated_foreign_keys.sql"),
    rule(IntersectedForeignKeys, "intersected_foreign_keys", "intersected_foreign_keys.sql"),
    rule(PossibleObjectNameOverflow, "possible_object_name_overflow", "possible_object_name_overflow.sql"),
    rule(TablesNotLinkedToOthers, "tables_not_linked_to_others", "tables_not_linked_to_others.sql"),
    rule(ForeignKeysWithUnmatchedColumnType, "foreign_keys_with_unmatched_column_type", "foreign_keys_with_unmatched_column_type.sql"),
    rule(TablesWithZeroOrOneColumn, "tables_with_zero_or_one_column", "tables_with_zero_or_one_column.sql"),
    rule(ObjectsNotFollowingNamingConvention, "objects_not_following_naming_convention", "objects_not_following_naming_convention.sql"),
];

impl Diagnostic {
    /// Every rule in declaration order
    pub fn all() -> impl Iterator<Item = Diagnostic> {
        REGISTRY.iter().map(|info| info.diagnostic)
    }

    pub fn info(self) -> &'static DiagnosticInfo {
        &REGISTRY[self as usize]
    }

    pub fn id(self) -> &'static str {
        self.info().id
    }

    pub fn topology(self) -> ExecutionTopology {
        self.info().topology
    }

    pub fn query_resource(self) -> &'static str {
        self.info().query_resource
    }

    pub fn params(self) -> QueryParams {
        self.info().params
    }

    pub fn is_across_cluster(self) -> bool {
        self.topology() == ExecutionTopology::AcrossCluster
    }

    pub fn is_runtime(self) -> bool {
        self.info().runtime
    }

    /// Static checks can run against an empty database, e.g. in integration tests
    pub fn is_static(self) -> bool {
        !self.is_runtime()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Diagnostic {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .iter()
            .find(|info| info.id == s)
            .map(|info| info.diagnostic)
            .ok_or_else(|| HealthError::invalid_argument(format!("unknown diagnostic '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_follows_declaration_order() {
        for (index, info) in REGISTRY.iter().enumerate() {
            assert_eq!(info.diagnostic as usize, index, "{} is out of order", info.id);
        }
        assert_eq!(Diagnostic::all().count(), 27);
    }

    #[test]
    fn test_resource_names_match_ids() {
        for info in REGISTRY.iter() {
            assert_eq!(info.query_resource, format!("{}.sql", info.id));
            assert_eq!(info.diagnostic.to_string(), info.id);
        }
    }

    #[test]
    fn test_only_usage_rules_run_across_cluster() {
        let across: Vec<Diagnostic> = Diagnostic::all()
            .filter(|diagnostic| diagnostic.is_across_cluster())
            .collect();
        assert_eq!(
            across,
            vec![Diagnostic::TablesWithMissingIndexes, Diagnostic::UnusedIndexes]
        );
        assert!(across.iter().all(|diagnostic| diagnostic.is_runtime()));
    }

    #[test]
    fn test_query_params() {
        assert_eq!(
            Diagnostic::BloatedTables.params(),
            QueryParams::SchemaWithBloatThreshold
        );
        assert_eq!(
            Diagnostic::SequenceOverflow.params(),
            QueryParams::SchemaWithRemainingPercentageThreshold
        );
        assert_eq!(Diagnostic::InvalidIndexes.params(), QueryParams::Schema);
        assert!(Diagnostic::InvalidIndexes.is_static());
    }

    #[test]
    fn test_parse_and_serde_ids_agree() {
        for diagnostic in Diagnostic::all() {
            let parsed: Diagnostic = diagnostic.id().parse().unwrap();
            assert_eq!(parsed, diagnostic);

            let value = toml::Value::try_from(diagnostic).unwrap();
            assert_eq!(value.as_str(), Some(diagnostic.id()));
        }
        assert!("no_such_rule".parse::<Diagnostic>().is_err());
    }
}
