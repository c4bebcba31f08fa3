use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::Scope;
use crate::model::*;

pub const DEFAULT_STATE: &str = "ALL";
pub const DEFAULT_PAGE_OFFSET: i64 = 0;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
    },
    InsertItem {
        owner_id: Id,
        name: String,
        description: String,
        available: bool,
    },
    SetAvailability {
        item_id: Id,
        user_id: Id,
        available: bool,
    },
    InsertBooking {
        booker_id: Id,
        item_id: Id,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        booking_id: Id,
        user_id: Id,
        approved: bool,
    },
    SelectBooking {
        id: Id,
        user_id: Id,
    },
    SelectBookings {
        scope: Scope,
        state: String,
        offset: i64,
        limit: i64,
    },
    SelectItem {
        id: Id,
        user_id: Id,
    },
    SelectOwnerItems {
        owner_id: Id,
        offset: i64,
        limit: i64,
    },
    SearchItems {
        text: String,
        offset: i64,
        limit: i64,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            expect_arity(&values, "users", 2)?;
            Ok(Command::InsertUser {
                name: parse_string(&values[0])?,
                email: parse_string(&values[1])?,
            })
        }
        "items" => {
            expect_arity(&values, "items", 2)?;
            let description = match values.get(2) {
                Some(expr) => parse_string_or_null(expr)?.unwrap_or_default(),
                None => String::new(),
            };
            let available = match values.get(3) {
                Some(expr) => parse_bool(expr)?,
                None => true,
            };
            Ok(Command::InsertItem {
                owner_id: parse_id(&values[0])?,
                name: parse_string(&values[1])?,
                description,
                available,
            })
        }
        "availability" => {
            expect_arity(&values, "availability", 3)?;
            Ok(Command::SetAvailability {
                item_id: parse_id(&values[0])?,
                user_id: parse_id(&values[1])?,
                available: parse_bool(&values[2])?,
            })
        }
        "bookings" => {
            expect_arity(&values, "bookings", 4)?;
            Ok(Command::InsertBooking {
                booker_id: parse_id(&values[0])?,
                item_id: parse_id(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            })
        }
        "decisions" => {
            expect_arity(&values, "decisions", 3)?;
            Ok(Command::DecideBooking {
                booking_id: parse_id(&values[0])?,
                user_id: parse_id(&values[1])?,
                approved: parse_bool(&values[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn expect_arity(values: &[Expr], table: &'static str, n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        return Err(SqlError::WrongArity(table, n, values.len()));
    }
    Ok(())
}

/// Equality filters collected from a `WHERE a = x AND b = y ...` clause.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Id>,
    user_id: Option<Id>,
    booker_id: Option<Id>,
    owner_id: Option<Id>,
    state: Option<String>,
    text: Option<String>,
    page_offset: Option<i64>,
    page_size: Option<i64>,
}

impl Filters {
    fn offset(&self) -> i64 {
        self.page_offset.unwrap_or(DEFAULT_PAGE_OFFSET)
    }

    fn limit(&self) -> i64 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            if let Some(id) = filters.id {
                return Ok(Command::SelectBooking {
                    id,
                    user_id: filters.user_id.ok_or(SqlError::MissingFilter("user_id"))?,
                });
            }
            let scope = match (filters.booker_id, filters.owner_id) {
                (Some(booker), None) => Scope::Booker(booker),
                (None, Some(owner)) => Scope::Owner(owner),
                (Some(_), Some(_)) => {
                    return Err(SqlError::Parse(
                        "filter on either booker_id or owner_id, not both".into(),
                    ));
                }
                (None, None) => return Err(SqlError::MissingFilter("booker_id or owner_id")),
            };
            Ok(Command::SelectBookings {
                scope,
                offset: filters.offset(),
                limit: filters.limit(),
                state: filters.state.unwrap_or_else(|| DEFAULT_STATE.to_string()),
            })
        }
        "items" => {
            if let Some(id) = filters.id {
                return Ok(Command::SelectItem {
                    id,
                    user_id: filters.user_id.ok_or(SqlError::MissingFilter("user_id"))?,
                });
            }
            if let Some(text) = filters.text.take() {
                return Ok(Command::SearchItems {
                    text,
                    offset: filters.offset(),
                    limit: filters.limit(),
                });
            }
            Ok(Command::SelectOwnerItems {
                owner_id: filters.owner_id.ok_or(SqlError::MissingFilter("owner_id"))?,
                offset: filters.offset(),
                limit: filters.limit(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left).ok_or_else(|| {
                SqlError::Parse(format!("expected column on left of '=', got {left}"))
            })?;
            match col.as_str() {
                "id" => filters.id = Some(parse_id(right)?),
                "user_id" => filters.user_id = Some(parse_id(right)?),
                "booker_id" => filters.booker_id = Some(parse_id(right)?),
                "owner_id" => filters.owner_id = Some(parse_id(right)?),
                "state" => filters.state = Some(parse_string(right)?),
                "text" => filters.text = Some(parse_string(right)?),
                "page_offset" => filters.page_offset = Some(parse_i64(right)?),
                "page_size" => filters.page_size = Some(parse_i64(right)?),
                _ => return Err(SqlError::UnknownColumn(col)),
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            rows => Err(SqlError::Unsupported(format!(
                "multi-row INSERT ({} rows)",
                rows.len()
            ))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_id(expr: &Expr) -> Result<Id, SqlError> {
    let v = parse_i64(expr)?;
    Id::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is not a valid id")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_user() {
        let sql = "INSERT INTO users (name, email) VALUES ('Olga', 'olga@example.com')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertUser {
                name: "Olga".into(),
                email: "olga@example.com".into(),
            }
        );
    }

    #[test]
    fn parse_insert_item_defaults() {
        let sql = "INSERT INTO items (owner_id, name) VALUES (1, 'Ladder')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertItem {
                owner_id: 1,
                name: "Ladder".into(),
                description: String::new(),
                available: true,
            }
        );
    }

    #[test]
    fn parse_insert_item_full() {
        let sql = "INSERT INTO items (owner_id, name, description, available) VALUES (3, 'Drill', 'cordless', false)";
        match parse_sql(sql).unwrap() {
            Command::InsertItem {
                owner_id,
                description,
                available,
                ..
            } => {
                assert_eq!(owner_id, 3);
                assert_eq!(description, "cordless");
                assert!(!available);
            }
            cmd => panic!("expected InsertItem, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_item_null_description() {
        let sql = "INSERT INTO items (owner_id, name, description) VALUES (3, 'Drill', NULL)";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertItem { ref description, .. } if description.is_empty()
        ));
    }

    #[test]
    fn parse_set_availability() {
        let sql = "INSERT INTO availability (item_id, user_id, available) VALUES (4, 1, 'f')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SetAvailability {
                item_id: 4,
                user_id: 1,
                available: false,
            }
        );
    }

    #[test]
    fn parse_insert_booking() {
        let sql = r#"INSERT INTO bookings (booker_id, item_id, start, "end") VALUES (2, 1, 1000, 2000)"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                booker_id: 2,
                item_id: 1,
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn parse_insert_booking_quoted_params() {
        // Extended-protocol parameters arrive as quoted text.
        let sql = r#"INSERT INTO bookings (booker_id, item_id, start, "end") VALUES ('2', '1', '1000', '2000')"#;
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking { start: 1000, end: 2000, .. }
        ));
    }

    #[test]
    fn parse_decision() {
        let sql = "INSERT INTO decisions (booking_id, user_id, approved) VALUES (9, 1, true)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::DecideBooking {
                booking_id: 9,
                user_id: 1,
                approved: true,
            }
        );
    }

    #[test]
    fn parse_select_single_booking() {
        let sql = "SELECT * FROM bookings WHERE id = 9 AND user_id = 2";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBooking { id: 9, user_id: 2 }
        );
    }

    #[test]
    fn parse_select_bookings_defaults() {
        let sql = "SELECT * FROM bookings WHERE booker_id = 2";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBookings {
                scope: Scope::Booker(2),
                state: "ALL".into(),
                offset: 0,
                limit: 10,
            }
        );
    }

    #[test]
    fn parse_select_owner_bookings_with_state_and_page() {
        let sql = "SELECT * FROM bookings WHERE owner_id = 1 AND state = 'FUTURE' AND page_offset = 20 AND page_size = 5";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBookings {
                scope: Scope::Owner(1),
                state: "FUTURE".into(),
                offset: 20,
                limit: 5,
            }
        );
    }

    #[test]
    fn state_token_passed_through_verbatim() {
        // Validation of the token belongs to the engine.
        let sql = "SELECT * FROM bookings WHERE booker_id = 2 AND state = 'current'";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectBookings { ref state, .. } if state == "current"
        ));
    }

    #[test]
    fn parse_select_bookings_needs_a_perspective() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE state = 'ALL'"),
            Err(SqlError::MissingFilter(_))
        ));
        assert!(parse_sql("SELECT * FROM bookings WHERE booker_id = 1 AND owner_id = 2").is_err());
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE id = 4"),
            Err(SqlError::MissingFilter("user_id"))
        ));
    }

    #[test]
    fn parse_select_items() {
        assert_eq!(
            parse_sql("SELECT * FROM items WHERE id = 4 AND user_id = 1").unwrap(),
            Command::SelectItem { id: 4, user_id: 1 }
        );
        assert_eq!(
            parse_sql("SELECT * FROM items WHERE owner_id = 1 AND page_size = 3").unwrap(),
            Command::SelectOwnerItems {
                owner_id: 1,
                offset: 0,
                limit: 3,
            }
        );
    }

    #[test]
    fn parse_search_items() {
        assert_eq!(
            parse_sql("SELECT * FROM items WHERE text = 'drill' AND page_offset = 5").unwrap(),
            Command::SearchItems {
                text: "drill".into(),
                offset: 5,
                limit: DEFAULT_PAGE_SIZE,
            }
        );
    }

    #[test]
    fn negative_page_offset_reaches_engine() {
        let sql = "SELECT * FROM bookings WHERE booker_id = 2 AND page_offset = -1";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectBookings { offset: -1, .. }
        ));
    }

    #[test]
    fn negative_id_rejected() {
        assert!(parse_sql("SELECT * FROM items WHERE owner_id = -1").is_err());
    }

    #[test]
    fn parse_unknown_column_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM items WHERE colour = 'red'"),
            Err(SqlError::UnknownColumn(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO foobar (id) VALUES (1)"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM foobar WHERE id = 1"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_wrong_arity_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO decisions (booking_id, user_id) VALUES (1, 2)"),
            Err(SqlError::WrongArity("decisions", 3, 2))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn delete_is_unsupported() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings WHERE id = 1"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
