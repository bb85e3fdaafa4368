use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{ConfigError, PricePeriod};
use crate::model::*;
use crate::schedule::{ScheduleConfig, TrailingSlot, WeekdaySet};

/// A timestamp as written by the client: Unix ms, or a wall-clock time in
/// the court's zone that only the engine's schedule can turn into an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeArg {
    Ms(Ms),
    Local(NaiveDateTime),
}

impl TimeArg {
    pub fn resolve(&self, config: &ScheduleConfig) -> Option<Ms> {
        match self {
            TimeArg::Ms(ms) => Some(*ms),
            TimeArg::Local(local) => config.local_to_ms(*local),
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCourt {
        id: Ulid,
        name: Option<String>,
        hourly_rate: Decimal,
    },
    SelectCourts,
    SetCourtAvailable {
        court_id: Ulid,
        available: bool,
    },
    UpsertSchedule {
        court_id: Ulid,
        config: ScheduleConfig,
    },
    DeleteSchedule {
        court_id: Ulid,
    },
    SelectSchedule {
        court_id: Ulid,
    },
    InsertPricePeriod {
        court_id: Ulid,
        period: PricePeriod,
    },
    DeletePricePeriod {
        id: Ulid,
    },
    SelectPricePeriods {
        court_id: Ulid,
    },
    SelectSlots {
        court_id: Ulid,
        date: NaiveDate,
    },
    InsertReservation {
        id: Ulid,
        court_id: Ulid,
        start: TimeArg,
        end: TimeArg,
        player_id: String,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectReservations {
        court_id: Ulid,
    },
    /// A player's reservations across courts, optionally narrowed to one.
    SelectPlayerReservations {
        player_id: String,
        court_id: Option<Ulid>,
    },
    InsertBlock {
        id: Ulid,
        court_id: Ulid,
        start: TimeArg,
        end: TimeArg,
        reason: Option<String>,
    },
    DeleteBlock {
        id: Ulid,
    },
    SelectBlocks {
        court_id: Ulid,
    },
}

impl Command {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::InsertCourt { .. } => "insert_court",
            Command::SelectCourts => "select_courts",
            Command::SetCourtAvailable { .. } => "set_court_available",
            Command::UpsertSchedule { .. } => "upsert_schedule",
            Command::DeleteSchedule { .. } => "delete_schedule",
            Command::SelectSchedule { .. } => "select_schedule",
            Command::InsertPricePeriod { .. } => "insert_price_period",
            Command::DeletePricePeriod { .. } => "delete_price_period",
            Command::SelectPricePeriods { .. } => "select_price_periods",
            Command::SelectSlots { .. } => "select_slots",
            Command::InsertReservation { .. } => "insert_reservation",
            Command::UpdateReservationStatus { .. } => "update_reservation_status",
            Command::SelectReservations { .. } => "select_reservations",
            Command::SelectPlayerReservations { .. } => "select_player_reservations",
            Command::InsertBlock { .. } => "insert_block",
            Command::DeleteBlock { .. } => "delete_block",
            Command::SelectBlocks { .. } => "select_blocks",
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let arity = |min: usize, max: usize| {
        if values.len() < min || values.len() > max {
            Err(SqlError::WrongArity(table_label(&table), min, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "courts" => {
            arity(3, 3)?;
            Ok(Command::InsertCourt {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                hourly_rate: parse_decimal(&values[2])?,
            })
        }
        "schedules" => {
            arity(7, 9)?;
            let mut config = ScheduleConfig::new(
                parse_time(&values[1])?,
                parse_time(&values[2])?,
                parse_u32(&values[3])?,
            )
            .with_weekdays(parse_weekdays(&values[4])?)
            .with_advance(parse_u32(&values[5])?, parse_u32(&values[6])?);
            if let Some(expr) = values.get(7)
                && let Some(policy) = parse_string_or_null(expr)?
            {
                config = config.with_trailing_slot(TrailingSlot::from_str(&policy)?);
            }
            if let Some(expr) = values.get(8)
                && let Some(zone) = parse_string_or_null(expr)?
            {
                let tz = Tz::from_str(zone.trim()).map_err(|_| ConfigError::UnknownTimezone(zone.clone()))?;
                config = config.with_timezone(tz);
            }
            Ok(Command::UpsertSchedule {
                court_id: parse_ulid(&values[0])?,
                config,
            })
        }
        "price_periods" => {
            arity(6, 6)?;
            Ok(Command::InsertPricePeriod {
                court_id: parse_ulid(&values[1])?,
                period: PricePeriod {
                    id: parse_ulid(&values[0])?,
                    start_time: parse_time(&values[2])?,
                    end_time: parse_time(&values[3])?,
                    label: parse_string_or_null(&values[4])?,
                    adjustment_percent: parse_decimal(&values[5])?,
                },
            })
        }
        "reservations" => {
            arity(5, 5)?;
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                court_id: parse_ulid(&values[1])?,
                start: parse_time_arg(&values[2])?,
                end: parse_time_arg(&values[3])?,
                player_id: parse_string(&values[4])?,
            })
        }
        "blocks" => {
            arity(4, 5)?;
            let reason = match values.get(4) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertBlock {
                id: parse_ulid(&values[0])?,
                court_id: parse_ulid(&values[1])?,
                start: parse_time_arg(&values[2])?,
                end: parse_time_arg(&values[3])?,
                reason,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = eq_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "schedules" => Ok(Command::DeleteSchedule {
            court_id: required_ulid(&filters, "court_id")?,
        }),
        "price_periods" => Ok(Command::DeletePricePeriod {
            id: required_ulid(&filters, "id")?,
        }),
        "blocks" => Ok(Command::DeleteBlock {
            id: required_ulid(&filters, "id")?,
        }),
        "reservations" => Err(SqlError::Unsupported(
            "reservations are never deleted; set status = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    match table.as_str() {
        "reservations" => parse_update_reservation(assignments, selection),
        "courts" => parse_update_court(assignments, selection),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

/// `UPDATE courts SET available = <bool> WHERE id = ...`
fn parse_update_court(assignments: &[ast::Assignment], selection: &Option<Expr>) -> Result<Command, SqlError> {
    let mut available = None;
    for assignment in assignments {
        match assignment_column(assignment).as_deref() {
            Some("available") => available = Some(parse_bool(&assignment.value)?),
            other => {
                return Err(SqlError::Unsupported(format!(
                    "cannot update column {}",
                    other.unwrap_or("?")
                )));
            }
        }
    }
    let filters = eq_filters(selection.as_ref())?;
    Ok(Command::SetCourtAvailable {
        court_id: required_ulid(&filters, "id")?,
        available: available.ok_or(SqlError::MissingFilter("available"))?,
    })
}

fn parse_update_reservation(
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let mut status = None;
    for assignment in assignments {
        match assignment_column(assignment).as_deref() {
            Some("status") => status = Some(parse_string(&assignment.value)?),
            other => {
                return Err(SqlError::Unsupported(format!(
                    "cannot update column {}",
                    other.unwrap_or("?")
                )));
            }
        }
    }
    let status = status.ok_or(SqlError::MissingFilter("status"))?;
    let status = ReservationStatus::from_str(&status).map_err(SqlError::Parse)?;
    if status == ReservationStatus::Pending {
        return Err(SqlError::Unsupported("a reservation cannot be set back to pending".into()));
    }

    let filters = eq_filters(selection.as_ref())?;
    Ok(Command::UpdateReservationStatus {
        id: required_ulid(&filters, "id")?,
        status,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = eq_filters(select.selection.as_ref())?;

    match table.as_str() {
        "courts" => Ok(Command::SelectCourts),
        "slots" => Ok(Command::SelectSlots {
            court_id: required_ulid(&filters, "court_id")?,
            date: parse_date(required(&filters, "date")?)?,
        }),
        "reservations" => match required(&filters, "player_id") {
            Ok(player) => Ok(Command::SelectPlayerReservations {
                player_id: parse_string(player)?,
                court_id: required(&filters, "court_id").ok().map(parse_ulid).transpose()?,
            }),
            Err(_) => Ok(Command::SelectReservations {
                court_id: required_ulid(&filters, "court_id")?,
            }),
        },
        "blocks" => Ok(Command::SelectBlocks {
            court_id: required_ulid(&filters, "court_id")?,
        }),
        "price_periods" => Ok(Command::SelectPricePeriods {
            court_id: required_ulid(&filters, "court_id")?,
        }),
        "schedules" => Ok(Command::SelectSchedule {
            court_id: required_ulid(&filters, "court_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Flatten `a = x AND b = y ...` into `(column, value)` pairs. Anything
/// other than equality conjunctions is rejected.
fn eq_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn required<'a>(filters: &[(String, &'a Expr)], column: &'static str) -> Result<&'a Expr, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == column)
        .map(|(_, e)| *e)
        .ok_or(SqlError::MissingFilter(column))
}

fn required_ulid(filters: &[(String, &Expr)], column: &'static str) -> Result<Ulid, SqlError> {
    parse_ulid(required(filters, column)?)
}

// ── Helpers ───────────────────────────────────────────────────

fn table_label(table: &str) -> &'static str {
    match table {
        "courts" => "courts",
        "schedules" => "schedules",
        "price_periods" => "price_periods",
        "reservations" => "reservations",
        "blocks" => "blocks",
        _ => "table",
    }
}

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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// First row of `INSERT ... VALUES`. One row per statement.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
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

/// The literal text of a string or number, `None` for NULL.
fn literal_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return match literal_text(expr)? {
            Some(text) => Ok(Some(format!("-{text}"))),
            None => Err(SqlError::Parse("cannot negate NULL".into())),
        };
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string or number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    literal_text(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    literal_text(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

/// `true`/`false`, quoted or not, as Postgres spells booleans.
fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(Value::Boolean(b)) = extract_value(expr) {
        return Ok(*b);
    }
    let s = parse_string(expr)?;
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(SqlError::Parse(format!("expected boolean, got {s}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let s = parse_string(expr)?;
    s.trim().parse().map_err(|_| SqlError::Parse(format!("expected non-negative integer, got {s}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = parse_string(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`. Seconds are kept so the schedule can reject them.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| SqlError::Parse(format!("bad time of day {s:?}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| SqlError::Parse(format!("bad date {s:?}")))
}

const LOCAL_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

fn parse_time_arg(expr: &Expr) -> Result<TimeArg, SqlError> {
    let s = parse_string(expr)?;
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Ok(TimeArg::Ms(ms));
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(TimeArg::Local)
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp {s:?}")))
}

/// `'1,2,3,4,5'` (ISO days), or a single number.
fn parse_weekdays(expr: &Expr) -> Result<WeekdaySet, SqlError> {
    let s = parse_string(expr)?;
    Ok(WeekdaySet::from_str(&s)?)
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
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    /// A schedule value that can never be valid, caught while parsing.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
