//! Built-in fleet queries and output layout defaults.

use fleet_query_fetch_models::OutputLayout;

/// Case counts split by the copy flag.
pub const SIMPLE_QUERY: &str =
    "SELECT is_copy as copy, COUNT(*) as count from cases GROUP BY is_copy";

/// Tests executed per year.
pub const COMPLEX_QUERY: &str = "SELECT YEAR(FROM_UNIXTIME(created_on)) AS year, \
    COUNT(*) AS tests_executed \
    FROM test_changes \
    GROUP BY year \
    ORDER BY year";

/// Grouping column used when none is given.
pub const DEFAULT_GROUP_COLUMN: &str = "copy";

/// Single output file written by the complex preset when no grouping
/// column is given.
pub const COMPLEX_FILE: &str = "complex.csv";

/// Query text and output layout chosen from the CLI options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySelection {
    pub query: String,
    pub layout: OutputLayout,
}

/// Picks the query: an explicit `query` wins over `complex`, which wins
/// over [`SIMPLE_QUERY`].
///
/// The layout is, in order: a single `output_file`, an explicit
/// `group_column`, one ungrouped file, `complex.csv` for the complex
/// preset, or grouping by [`DEFAULT_GROUP_COLUMN`].
#[must_use]
pub fn select_query(
    query: Option<String>,
    complex: bool,
    group_column: Option<String>,
    output_file: Option<String>,
    ungrouped: bool,
) -> QuerySelection {
    let query = query.unwrap_or_else(|| {
        if complex {
            COMPLEX_QUERY.to_string()
        } else {
            SIMPLE_QUERY.to_string()
        }
    });

    let layout = match (output_file, group_column) {
        (Some(file_name), _) => OutputLayout::Single { file_name },
        (None, Some(column)) => OutputLayout::Grouped { column },
        (None, None) if ungrouped => OutputLayout::Ungrouped,
        (None, None) if complex => OutputLayout::Single {
            file_name: COMPLEX_FILE.to_string(),
        },
        (None, None) => OutputLayout::Grouped {
            column: DEFAULT_GROUP_COLUMN.to_string(),
        },
    };

    QuerySelection { query, layout }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_simple_query_grouped_by_copy() {
        let selection = select_query(None, false, None, None, false);
        assert_eq!(selection.query, SIMPLE_QUERY);
        assert_eq!(selection.layout.group_column(), Some("copy"));
    }

    #[test]
    fn complex_without_group_writes_single_file() {
        let selection = select_query(None, true, None, None, false);
        assert_eq!(selection.query, COMPLEX_QUERY);
        assert_eq!(selection.layout.file_name("all"), "complex.csv");
    }

    #[test]
    fn complex_with_group_column_groups() {
        let selection = select_query(None, true, Some("year".to_string()), None, false);
        assert_eq!(selection.layout.file_name("2021"), "year_2021.csv");
    }

    #[test]
    fn explicit_query_wins() {
        let selection = select_query(Some("SELECT 1 AS one".to_string()), true, None, None, true);
        assert_eq!(selection.query, "SELECT 1 AS one");
        assert_eq!(selection.layout, OutputLayout::Ungrouped);
    }

    #[test]
    fn output_file_overrides_everything() {
        let selection = select_query(
            None,
            false,
            Some("copy".to_string()),
            Some("all.csv".to_string()),
            false,
        );
        assert_eq!(
            selection.layout,
            OutputLayout::Single {
                file_name: "all.csv".to_string()
            }
        );
    }
}
