use crate::chunk::Encoding;
use crate::sql::SqlType;

/// Schema of one column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub column_id: i32,
    pub name: String,
    pub sql_type: SqlType,
    pub encoding: Encoding,
}

impl ColumnInfo {
    /// A column stored raw at its type's natural width.
    pub fn raw(column_id: i32, name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            column_id,
            name: name.into(),
            sql_type,
            encoding: Encoding::Raw {
                width: sql_type.byte_width(),
            },
        }
    }

    /// A column narrowed to `bits` on disk.
    pub fn fixed(column_id: i32, name: impl Into<String>, sql_type: SqlType, bits: u8) -> Self {
        Self {
            column_id,
            name: name.into(),
            sql_type,
            encoding: Encoding::Fixed { bits },
        }
    }
}

/// Schema of a table as the executor sees it; catalog persistence is out of
/// scope.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub db_id: i32,
    pub table_id: i32,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column(&self, column_id: i32) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }
}
