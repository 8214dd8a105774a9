use crate::types::Cell;

/// A row read from the source table, with its cells in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, Cell)>,
}

impl SourceRow {
    pub fn new(columns: Vec<(String, Cell)>) -> Self {
        Self { columns }
    }

    /// Returns the cell of `column`, or [`None`] when the row has no such column.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    /// Returns the cell of `column` when it exists and is not null.
    pub fn get_non_null(&self, column: &str) -> Option<&Cell> {
        self.get(column).filter(|cell| !cell.is_null())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for SourceRow
where
    K: Into<String>,
    V: Into<Cell>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, cell)| (name.into(), cell.into()))
                .collect(),
        }
    }
}

/// Rows returned by one statement, in the order the database produced them.
pub type RowSet = Vec<SourceRow>;
