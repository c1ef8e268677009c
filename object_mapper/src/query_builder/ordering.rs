//! ORDER BY items over attribute paths

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub path: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(path: &str) -> Self {
        Self {
            path: path.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(path: &str) -> Self {
        Self {
            path: path.to_string(),
            order: SortOrder::Desc,
        }
    }
}
