use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        spec: RoomSpec,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        id: Option<Ulid>,
        filter: RoomFilter,
    },
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        returning: bool,
    },
    /// Date change. Either date may be omitted to keep the current one.
    UpdateBooking {
        id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
        returning: bool,
    },
    /// Soft cancel. The row stays.
    DeleteBooking {
        id: Ulid,
        returning: bool,
    },
    SelectBookings {
        id: Option<Ulid>,
        filter: BookingFilter,
    },
    SelectAvailableRooms {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SelectAvailability {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude_id: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection, returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row shape a statement answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Rooms,
    Bookings,
    Availability,
}

/// Which rows a statement will return, read from its syntax tree so `$n`
/// placeholders need not be bound yet. `None` for statements that answer
/// with a command tag only, and for anything that does not parse.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            match table_factor_name(&select.from.first()?.relation).ok()?.as_str() {
                "rooms" | "available_rooms" => Some(ResultShape::Rooms),
                "bookings" => Some(ResultShape::Bookings),
                "availability" => Some(ResultShape::Availability),
                _ => None,
            }
        }
        // Only booking writes honour RETURNING.
        Statement::Insert(insert) if insert.returning.is_some() => {
            booking_rows(insert_table_name(insert))
        }
        Statement::Update {
            table,
            returning: Some(_),
            ..
        } => booking_rows(table_factor_name(&table.relation)),
        Statement::Delete(delete) if delete.returning.is_some() => {
            booking_rows(delete_table_name(delete))
        }
        _ => None,
    }
}

fn booking_rows(table: Result<String, SqlError>) -> Option<ResultShape> {
    (table.ok()? == "bookings").then_some(ResultShape::Bookings)
}

// ── INSERT ────────────────────────────────────────────────────

const ROOM_COLUMNS: &[&str] = &[
    "id",
    "room_number",
    "price_per_night",
    "capacity",
    "is_active",
    "description",
];
const BOOKING_COLUMNS: &[&str] = &["id", "room_id", "check_in", "check_out"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            let row = Row::from_insert(insert, ROOM_COLUMNS)?;
            let spec = RoomSpec {
                number: parse_string("room_number", row.required("room_number")?)?,
                price_per_night: parse_decimal("price_per_night", row.required("price_per_night")?)?,
                capacity: parse_u32("capacity", row.required("capacity")?)?,
                is_active: row
                    .optional("is_active")
                    .map(|v| parse_bool("is_active", v))
                    .transpose()?
                    .unwrap_or(true),
                description: row
                    .optional("description")
                    .map(|v| parse_string_or_null("description", v))
                    .transpose()?
                    .flatten(),
            };
            Ok(Command::InsertRoom {
                id: parse_ulid("id", row.required("id")?)?,
                spec,
            })
        }
        "bookings" => {
            let row = Row::from_insert(insert, BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                id: parse_ulid("id", row.required("id")?)?,
                room_id: parse_ulid("room_id", row.required("room_id")?)?,
                check_in: parse_date("check_in", row.required("check_in")?)?,
                check_out: parse_date("check_out", row.required("check_out")?)?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name. Without an explicit column list the
/// values are taken positionally in the table's canonical order.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, canonical: &[&str]) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        let names: Vec<String> = if insert.columns.is_empty() {
            canonical.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > names.len() {
            return Err(SqlError::WrongArity(names.len(), values.len()));
        }
        if !insert.columns.is_empty() && names.len() != values.len() {
            return Err(SqlError::WrongArity(names.len(), values.len()));
        }
        let mut cells = Vec::with_capacity(values.len());
        for (name, value) in names.into_iter().zip(values) {
            if !canonical.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(name));
            }
            cells.push((name, value));
        }
        Ok(Self { cells })
    }

    fn optional(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.optional(column).ok_or(SqlError::MissingColumn(column))
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        sets.push((column, &a.value));
    }

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "room_number" => patch.number = Some(parse_string("room_number", value)?),
                    "price_per_night" => patch.price_per_night = Some(parse_decimal("price_per_night", value)?),
                    "capacity" => patch.capacity = Some(parse_u32("capacity", value)?),
                    "is_active" => patch.is_active = Some(parse_bool("is_active", value)?),
                    "description" => patch.description = Some(parse_string_or_null("description", value)?),
                    _ => return Err(SqlError::ReadOnlyColumn(column)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "bookings" => {
            let (mut check_in, mut check_out) = (None, None);
            for (column, value) in sets {
                match column.as_str() {
                    "check_in" => check_in = Some(parse_date("check_in", value)?),
                    "check_out" => check_out = Some(parse_date("check_out", value)?),
                    _ => return Err(SqlError::ReadOnlyColumn(column)),
                }
            }
            Ok(Command::UpdateBooking {
                id,
                check_in,
                check_out,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;
    let returning = delete.returning.is_some();

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id, returning }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut predicates = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut predicates)?;
    }

    match table.as_str() {
        "rooms" => select_rooms(predicates),
        "bookings" => select_bookings(predicates),
        "available_rooms" => {
            let (mut check_in, mut check_out) = (None, None);
            for p in predicates {
                match (p.column.as_str(), p.op) {
                    ("check_in", Op::Eq) => check_in = Some(parse_date("check_in", p.value)?),
                    ("check_out", Op::Eq) => check_out = Some(parse_date("check_out", p.value)?),
                    _ => return Err(p.unsupported()),
                }
            }
            Ok(Command::SelectAvailableRooms {
                check_in: check_in.ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: check_out.ok_or(SqlError::MissingFilter("check_out"))?,
            })
        }
        "availability" => {
            let (mut room_id, mut check_in, mut check_out, mut exclude_id) = (None, None, None, None);
            for p in predicates {
                match (p.column.as_str(), p.op) {
                    ("room_id", Op::Eq) => room_id = Some(parse_ulid("room_id", p.value)?),
                    ("check_in", Op::Eq) => check_in = Some(parse_date("check_in", p.value)?),
                    ("check_out", Op::Eq) => check_out = Some(parse_date("check_out", p.value)?),
                    ("exclude_id", Op::Eq) => exclude_id = Some(parse_ulid("exclude_id", p.value)?),
                    _ => return Err(p.unsupported()),
                }
            }
            Ok(Command::SelectAvailability {
                room_id: room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                check_in: check_in.ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: check_out.ok_or(SqlError::MissingFilter("check_out"))?,
                exclude_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn select_rooms(predicates: Vec<Predicate<'_>>) -> Result<Command, SqlError> {
    let mut id = None;
    let mut filter = RoomFilter::default();
    for p in predicates {
        match (p.column.as_str(), p.op) {
            ("id", Op::Eq) => id = Some(parse_ulid("id", p.value)?),
            ("price_per_night", Op::GtEq) => filter.min_price = Some(parse_decimal("price_per_night", p.value)?),
            ("price_per_night", Op::LtEq) => filter.max_price = Some(parse_decimal("price_per_night", p.value)?),
            ("capacity", Op::Eq) => filter.capacity = Some(parse_u32("capacity", p.value)?),
            ("is_active", Op::Eq) => filter.is_active = Some(parse_bool("is_active", p.value)?),
            _ => return Err(p.unsupported()),
        }
    }
    Ok(Command::SelectRooms { id, filter })
}

fn select_bookings(predicates: Vec<Predicate<'_>>) -> Result<Command, SqlError> {
    let mut id = None;
    let mut filter = BookingFilter::default();
    for p in predicates {
        match (p.column.as_str(), p.op) {
            ("id", Op::Eq) => id = Some(parse_ulid("id", p.value)?),
            ("status", Op::Eq) => {
                filter.status = Some(match parse_string("status", p.value)?.to_lowercase().as_str() {
                    "active" => StatusFilter::Active,
                    "cancelled" => StatusFilter::Cancelled,
                    other => {
                        return Err(SqlError::BadValue {
                            column: "status",
                            message: format!("unknown status {other:?}"),
                        });
                    }
                })
            }
            ("room_id", Op::Eq) => filter.room_id = Some(parse_ulid("room_id", p.value)?),
            ("user_id", Op::Eq) => filter.user_id = Some(parse_string("user_id", p.value)?),
            ("check_in", Op::GtEq) => filter.check_in_after = Some(parse_date("check_in", p.value)?),
            ("check_in", Op::LtEq) => filter.check_in_before = Some(parse_date("check_in", p.value)?),
            ("check_out", Op::GtEq) => filter.check_out_after = Some(parse_date("check_out", p.value)?),
            ("check_out", Op::LtEq) => filter.check_out_before = Some(parse_date("check_out", p.value)?),
            ("is_past", Op::Eq) => filter.is_past = Some(parse_bool("is_past", p.value)?),
            ("is_upcoming", Op::Eq) => filter.is_upcoming = Some(parse_bool("is_upcoming", p.value)?),
            ("is_current", Op::Eq) => filter.is_current = Some(parse_bool("is_current", p.value)?),
            _ => return Err(p.unsupported()),
        }
    }
    Ok(Command::SelectBookings { id, filter })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

struct Predicate<'a> {
    column: String,
    op: Op,
    value: &'a Expr,
}

impl Predicate<'_> {
    fn unsupported(&self) -> SqlError {
        SqlError::Unsupported(format!("filter {} {:?}", self.column, self.op))
    }
}

/// Flatten a conjunction of `column <op> value` comparisons.
fn collect_predicates<'a>(expr: &'a Expr, out: &mut Vec<Predicate<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_predicates(left, out)?;
                    return collect_predicates(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                ast::BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("left operand {left}")))?;
            out.push(Predicate {
                column,
                op,
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid("id", right),
        _ => Err(SqlError::MissingFilter("id")),
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

/// Text-ish literal: quoted string or bare number.
fn literal_text<'a>(column: &'static str, expr: &'a Expr) -> Result<&'a str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.as_str()),
        Some(other) => Err(bad_value(column, format!("expected literal, got {other}"))),
        None => Err(bad_value(column, format!("expected value, got {expr}"))),
    }
}

fn bad_value(column: &'static str, message: String) -> SqlError {
    SqlError::BadValue { column, message }
}

fn parse_ulid(column: &'static str, expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(column, expr)?;
    Ulid::from_string(s).map_err(|e| bad_value(column, format!("bad ULID {s:?}: {e}")))
}

fn parse_string(column: &'static str, expr: &Expr) -> Result<String, SqlError> {
    literal_text(column, expr).map(str::to_string)
}

fn parse_string_or_null(column: &'static str, expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(column, expr).map(Some),
    }
}

fn parse_date(column: &'static str, expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(column, expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| bad_value(column, format!("bad date {s:?} (expected YYYY-MM-DD): {e}")))
}

fn parse_decimal(column: &'static str, expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(column, expr)?);
    }
    let s = literal_text(column, expr)?;
    Decimal::from_str(s).map_err(|e| bad_value(column, format!("bad decimal {s:?}: {e}")))
}

fn parse_u32(column: &'static str, expr: &Expr) -> Result<u32, SqlError> {
    let s = literal_text(column, expr)?;
    s.parse()
        .map_err(|e| bad_value(column, format!("bad integer {s:?}: {e}")))
}

fn parse_bool(column: &'static str, expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(bad_value(column, format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(bad_value(column, format!("expected bool, got {other}"))),
        None => Err(bad_value(column, format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column {0} cannot be set")]
    ReadOnlyColumn(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("{message}")]
    BadValue { column: &'static str, message: String },
}

impl SqlError {
    /// Column the error is scoped to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            SqlError::UnknownColumn(c) | SqlError::ReadOnlyColumn(c) => Some(c),
            SqlError::MissingColumn(c) | SqlError::MissingFilter(c) => Some(c),
            SqlError::BadValue { column, .. } => Some(column),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ROOM: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_insert_room_with_columns() {
        let sql = format!(
            "INSERT INTO rooms (id, room_number, price_per_night, capacity, description) \
             VALUES ('{ID}', '101', 120.50, 2, 'sea view')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { id, spec } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(spec.number, "101");
                assert_eq!(spec.price_per_night, dec!(120.50));
                assert_eq!(spec.capacity, 2);
                assert!(spec.is_active);
                assert_eq!(spec.description.as_deref(), Some("sea view"));
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_positional() {
        let sql = format!("INSERT INTO rooms VALUES ('{ID}', '102', '80', 1, false, NULL)");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { spec, .. } => {
                assert_eq!(spec.price_per_night, dec!(80));
                assert!(!spec.is_active);
                assert_eq!(spec.description, None);
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_missing_price() {
        let sql = format!("INSERT INTO rooms (id, room_number, capacity) VALUES ('{ID}', '101', 2)");
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("price_per_night")));
        assert_eq!(err.field(), Some("price_per_night"));
    }

    #[test]
    fn parse_update_room_partial() {
        let sql = format!("UPDATE rooms SET price_per_night = 99.99, is_active = false WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateRoom { patch, .. } => {
                assert_eq!(patch.price_per_night, Some(dec!(99.99)));
                assert_eq!(patch.is_active, Some(false));
                assert_eq!(patch.number, None);
                assert_eq!(patch.description, None);
            }
            cmd => panic!("expected UpdateRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_room() {
        let sql = format!("DELETE FROM rooms WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteRoom { .. }));
    }

    #[test]
    fn parse_select_rooms_filters() {
        let sql = "SELECT * FROM rooms WHERE price_per_night >= 50 AND price_per_night <= 150.00 AND capacity = 2";
        match parse_sql(sql).unwrap() {
            Command::SelectRooms { id, filter } => {
                assert_eq!(id, None);
                assert_eq!(filter.min_price, Some(dec!(50)));
                assert_eq!(filter.max_price, Some(dec!(150.00)));
                assert_eq!(filter.capacity, Some(2));
                assert_eq!(filter.is_active, None);
            }
            cmd => panic!("expected SelectRooms, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_returning() {
        let sql = format!(
            "INSERT INTO bookings (id, room_id, check_in, check_out) \
             VALUES ('{ID}', '{ROOM}', '2024-01-10', '2024-01-13') RETURNING *"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { id, room_id, check_in, check_out, returning } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(room_id.to_string(), ROOM);
                assert_eq!(check_in, date("2024-01-10"));
                assert_eq!(check_out, date("2024-01-13"));
                assert!(returning);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_bad_date() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', '{ROOM}', '2024-13-01', '2024-01-13')");
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::BadValue { column: "check_in", .. }), "{err:?}");
        assert_eq!(err.field(), Some("check_in"));
    }

    #[test]
    fn result_shape_follows_statement_structure() {
        assert_eq!(result_shape("SELECT * FROM rooms"), Some(ResultShape::Rooms));
        assert_eq!(
            result_shape("SELECT * FROM available_rooms WHERE check_in = $1 AND check_out = $2"),
            Some(ResultShape::Rooms)
        );
        assert_eq!(
            result_shape("SELECT * FROM availability WHERE room_id = $1"),
            Some(ResultShape::Availability)
        );
        assert_eq!(
            result_shape("UPDATE bookings SET check_in = $2 WHERE id = $1 RETURNING *"),
            Some(ResultShape::Bookings)
        );
        assert_eq!(result_shape("DELETE FROM bookings WHERE id = $1"), None);
        assert_eq!(
            result_shape(
                "INSERT INTO rooms (id, room_number, price_per_night, capacity, description) \
                 VALUES ($1, $2, $3, $4, 'by the bookings desk, returning guests welcome')"
            ),
            None
        );
        assert_eq!(result_shape("SELEC nonsense"), None);
    }

    #[test]
    fn malformed_values_name_their_column() {
        let cases = [
            (format!("UPDATE rooms SET capacity = 'two' WHERE id = '{ID}'"), "capacity"),
            (format!("UPDATE rooms SET price_per_night = 'cheap' WHERE id = '{ID}'"), "price_per_night"),
            ("SELECT * FROM rooms WHERE is_active = 'maybe'".to_string(), "is_active"),
            ("SELECT * FROM bookings WHERE room_id = 'nope'".to_string(), "room_id"),
            (
                format!("SELECT * FROM availability WHERE room_id = '{ROOM}' AND check_in = '2024-02-30' AND check_out = '2024-03-02'"),
                "check_in",
            ),
        ];
        for (sql, column) in cases {
            let err = parse_sql(&sql).unwrap_err();
            assert_eq!(err.field(), Some(column), "{sql}: {err}");
        }
    }

    #[test]
    fn parse_update_booking_one_date() {
        let sql = format!("UPDATE bookings SET check_out = '2024-01-20' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { check_in, check_out, returning, .. } => {
                assert_eq!(check_in, None);
                assert_eq!(check_out, Some(date("2024-01-20")));
                assert!(!returning);
            }
            cmd => panic!("expected UpdateBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_price_rejected() {
        let sql = format!("UPDATE bookings SET total_price = 1 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::ReadOnlyColumn(c)) if c == "total_price"));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET check_in = '2024-01-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_booking_is_cancel() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}' RETURNING *");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::DeleteBooking { returning: true, .. }
        ));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!(
            "SELECT * FROM bookings WHERE status = 'active' AND room_id = '{ROOM}' \
             AND check_in >= '2024-01-01' AND check_out <= '2024-02-01' AND is_upcoming = true"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings { id, filter } => {
                assert_eq!(id, None);
                assert_eq!(filter.status, Some(StatusFilter::Active));
                assert_eq!(filter.room_id.map(|r| r.to_string()).as_deref(), Some(ROOM));
                assert_eq!(filter.check_in_after, Some(date("2024-01-01")));
                assert_eq!(filter.check_out_before, Some(date("2024-02-01")));
                assert_eq!(filter.is_upcoming, Some(true));
            }
            cmd => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_unknown_status() {
        let err = parse_sql("SELECT * FROM bookings WHERE status = 'pending'").unwrap_err();
        assert_eq!(err.field(), Some("status"));
    }

    #[test]
    fn parse_select_available_rooms() {
        let sql = "SELECT * FROM available_rooms WHERE check_in = '2024-01-10' AND check_out = '2024-01-15'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableRooms {
                check_in: date("2024-01-10"),
                check_out: date("2024-01-15"),
            }
        );
    }

    #[test]
    fn parse_select_available_rooms_missing_date() {
        let sql = "SELECT * FROM available_rooms WHERE check_in = '2024-01-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("check_out"))));
    }

    #[test]
    fn parse_select_availability_with_exclude() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{ROOM}' AND check_in = '2024-01-10' \
             AND check_out = '2024-01-15' AND exclude_id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { exclude_id, .. } => {
                assert_eq!(exclude_id.map(|e| e.to_string()).as_deref(), Some(ID));
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unsupported_operator() {
        let sql = "SELECT * FROM rooms WHERE capacity > 2";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
