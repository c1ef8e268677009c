//! Database-specific syntax parameters

use config::{DialectConfig, DialectKind, DEFAULT_STREAM_THRESHOLD};

use crate::query_builder::aggregation::DatePart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?`
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT count OFFSET offset`
    LimitOffset,
    /// `LIMIT offset, count`
    OffsetComma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    kind: DialectKind,
    quote: char,
    placeholder: PlaceholderStyle,
    limit_style: LimitStyle,
    unlimited: &'static str,
    omit_identity_on_insert: bool,
    insert_returning: bool,
    stream_threshold: usize,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::postgres()
    }
}

impl Dialect {
    pub fn postgres() -> Self {
        Self {
            kind: DialectKind::Postgres,
            quote: '"',
            placeholder: PlaceholderStyle::Numbered,
            limit_style: LimitStyle::LimitOffset,
            unlimited: "ALL",
            omit_identity_on_insert: true,
            insert_returning: true,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }

    pub fn mysql() -> Self {
        Self {
            kind: DialectKind::Mysql,
            quote: '`',
            placeholder: PlaceholderStyle::Positional,
            limit_style: LimitStyle::OffsetComma,
            unlimited: "18446744073709551615",
            omit_identity_on_insert: true,
            insert_returning: false,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            kind: DialectKind::Sqlite,
            quote: '"',
            placeholder: PlaceholderStyle::Positional,
            limit_style: LimitStyle::LimitOffset,
            unlimited: "-1",
            omit_identity_on_insert: true,
            insert_returning: true,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }

    /// Dialect for `config.kind` with the configured overrides applied
    pub fn from_config(config: &DialectConfig) -> Self {
        let base = match config.kind {
            DialectKind::Postgres => Self::postgres(),
            DialectKind::Mysql => Self::mysql(),
            DialectKind::Sqlite => Self::sqlite(),
        };
        Self {
            quote: config.identifier_quote(),
            omit_identity_on_insert: config.omit_identity_on_insert(),
            stream_threshold: config.stream_threshold(),
            ..base
        }
    }

    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    pub fn omit_identity_on_insert(&self) -> bool {
        self.omit_identity_on_insert
    }

    pub fn insert_returning(&self) -> bool {
        self.insert_returning
    }

    pub fn stream_threshold(&self) -> usize {
        self.stream_threshold
    }

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote(&self, identifier: &str) -> String {
        let doubled = format!("{}{}", self.quote, self.quote);
        format!(
            "{}{}{}",
            self.quote,
            identifier.replace(self.quote, &doubled),
            self.quote
        )
    }

    pub fn table_ref(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(table)),
            None => self.quote(table),
        }
    }

    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder {
            PlaceholderStyle::Numbered => format!("${}", index),
            PlaceholderStyle::Positional => "?".to_string(),
        }
    }

    /// LIMIT/OFFSET clause with a leading space, empty when unpaged
    pub fn limit_clause(&self, offset: Option<u64>, limit: Option<u64>) -> String {
        match (self.limit_style, offset, limit) {
            (_, None, None) => String::new(),
            (_, None, Some(limit)) => format!(" LIMIT {}", limit),
            (LimitStyle::LimitOffset, Some(offset), Some(limit)) => {
                format!(" LIMIT {} OFFSET {}", limit, offset)
            }
            (LimitStyle::LimitOffset, Some(offset), None) => {
                format!(" LIMIT {} OFFSET {}", self.unlimited, offset)
            }
            (LimitStyle::OffsetComma, Some(offset), Some(limit)) => {
                format!(" LIMIT {}, {}", offset, limit)
            }
            (LimitStyle::OffsetComma, Some(offset), None) => {
                format!(" LIMIT {}, {}", offset, self.unlimited)
            }
        }
    }

    /// Integer calendar component of `expr`; weekdays count Monday as 0
    pub fn date_part(&self, part: DatePart, expr: &str) -> String {
        match self.kind {
            DialectKind::Postgres => match part {
                DatePart::Weekday => format!("CAST(EXTRACT(ISODOW FROM {}) - 1 AS INTEGER)", expr),
                other => format!(
                    "CAST(EXTRACT({} FROM {}) AS INTEGER)",
                    Self::part_name(other),
                    expr
                ),
            },
            DialectKind::Mysql => match part {
                DatePart::Weekday => format!("WEEKDAY({})", expr),
                other => format!("{}({})", Self::part_name(other), expr),
            },
            DialectKind::Sqlite => {
                let format = match part {
                    DatePart::Year => "%Y",
                    DatePart::Month => "%m",
                    DatePart::Day => "%d",
                    DatePart::Hour => "%H",
                    DatePart::Weekday => {
                        return format!("((CAST(strftime('%w', {}) AS INTEGER) + 6) % 7)", expr);
                    }
                };
                format!("CAST(strftime('{}', {}) AS INTEGER)", format, expr)
            }
        }
    }

    fn part_name(part: DatePart) -> &'static str {
        match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Hour => "HOUR",
            DatePart::Weekday => "WEEKDAY",
        }
    }

    pub fn concat(&self, parts: &[String]) -> String {
        match self.kind {
            DialectKind::Mysql => format!("CONCAT({})", parts.join(", ")),
            DialectKind::Postgres | DialectKind::Sqlite => format!("({})", parts.join(" || ")),
        }
    }
}
