/// Join used to attach every non-root table node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    /// LEFT JOIN - keeps root rows without related rows
    #[default]
    Left,
    /// FULL OUTER JOIN - keeps unmatched rows from both sides
    Full,
}

impl JoinType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Left => "LEFT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_type_to_sql() {
        assert_eq!(JoinType::Left.to_sql(), "LEFT JOIN");
        assert_eq!(JoinType::Full.to_sql(), "FULL OUTER JOIN");
        assert_eq!(JoinType::default(), JoinType::Left);
    }
}
