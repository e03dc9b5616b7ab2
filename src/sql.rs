use std::collections::HashMap;

use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::CourtPatch;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCourt {
        id: Ulid,
        name: String,
        /// Defaults to the calling user.
        owner_id: Option<String>,
        open: Minutes,
        close: Minutes,
        slot_minutes: Minutes,
        operating_days: Option<Vec<Weekday>>,
    },
    UpdateCourt {
        id: Ulid,
        patch: CourtPatch,
    },
    DeleteCourt {
        id: Ulid,
    },
    BlockDate {
        court_id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
    },
    UnblockDate {
        court_id: Ulid,
        date: NaiveDate,
    },
    /// Times stay as submitted; the engine validates them.
    InsertReservation {
        id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    Reschedule {
        id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    SetState {
        id: Ulid,
        state: ReservationState,
    },
    SetPaid {
        id: Ulid,
        paid: bool,
    },
    SelectCourts {
        id: Option<Ulid>,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectSlots {
        court_id: Ulid,
        date: NaiveDate,
    },
    SelectFreeRanges {
        court_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minutes>,
    },
    SelectReport {
        court_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationFilter {
    Id(Ulid),
    Day { court_id: Ulid, date: NaiveDate },
    User(String),
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
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

const COURT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "owner_id",
    "opens_at",
    "closes_at",
    "slot_minutes",
    "operating_days",
];
const BLOCKED_DATE_COLUMNS: &[&str] = &["court_id", "date", "reason"];
const RESERVATION_COLUMNS: &[&str] = &["id", "court_id", "date", "start", "end"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "courts" => {
            let row = insert_row(insert, "courts", COURT_COLUMNS, 6)?;
            Ok(Command::InsertCourt {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                owner_id: row.optional("owner_id").map(parse_string_or_null).transpose()?.flatten(),
                open: parse_time(row.required("opens_at")?)?,
                close: parse_time(row.required("closes_at")?)?,
                slot_minutes: parse_u32(row.required("slot_minutes")?)?,
                operating_days: row
                    .optional("operating_days")
                    .map(parse_weekdays_or_null)
                    .transpose()?
                    .flatten(),
            })
        }
        "blocked_dates" => {
            let row = insert_row(insert, "blocked_dates", BLOCKED_DATE_COLUMNS, 2)?;
            Ok(Command::BlockDate {
                court_id: parse_ulid(row.required("court_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                reason: row.optional("reason").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "reservations" => {
            let row = insert_row(insert, "reservations", RESERVATION_COLUMNS, 5)?;
            Ok(Command::InsertReservation {
                id: parse_ulid(row.required("id")?)?,
                court_id: parse_ulid(row.required("court_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                start: parse_string(row.required("start")?)?,
                end: parse_string(row.required("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name. Without a column list the
/// table's default column order applies.
struct Row(HashMap<String, Expr>);

impl Row {
    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.0.get(col).ok_or(SqlError::MissingColumn(col))
    }

    fn optional(&self, col: &str) -> Option<&Expr> {
        self.0.get(col)
    }
}

fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
    min_values: usize,
) -> Result<Row, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() < min_values || values.len() > default_columns.len() {
            return Err(SqlError::WrongArity(table, min_values, values.len()));
        }
        default_columns.iter().map(|c| c.to_string()).collect()
    } else {
        if values.len() != insert.columns.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    Ok(Row(columns.into_iter().zip(values).collect()))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = where_id(selection)?;

    let mut set: HashMap<String, &Expr> = HashMap::new();
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.insert(col, &a.value);
    }

    match table.as_str() {
        "courts" => {
            let mut patch = CourtPatch::default();
            for (col, value) in &set {
                match col.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "opens_at" => patch.open = Some(parse_time(value)?),
                    "closes_at" => patch.close = Some(parse_time(value)?),
                    "slot_minutes" => patch.slot_minutes = Some(parse_u32(value)?),
                    "operating_days" => patch.operating_days = Some(parse_weekdays_or_null(value)?),
                    other => return Err(SqlError::Unsupported(format!("cannot update courts.{other}"))),
                }
            }
            Ok(Command::UpdateCourt { id, patch })
        }
        "reservations" => {
            let mut cols: Vec<&str> = set.keys().map(String::as_str).collect();
            cols.sort_unstable();
            match cols.as_slice() {
                ["state"] => Ok(Command::SetState {
                    id,
                    state: parse_string(set["state"])?
                        .parse()
                        .map_err(|e: crate::engine::ValidationError| SqlError::Parse(e.to_string()))?,
                }),
                ["paid"] => Ok(Command::SetPaid {
                    id,
                    paid: parse_bool(set["paid"])?,
                }),
                ["date", "end", "start"] => Ok(Command::Reschedule {
                    id,
                    date: parse_date_expr(set["date"])?,
                    start: parse_string(set["start"])?,
                    end: parse_string(set["end"])?,
                }),
                _ => Err(SqlError::Unsupported(
                    "reservations accept SET state, SET paid, or SET \"date\", start, \"end\"".into(),
                )),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "courts" => Ok(Command::DeleteCourt {
            id: where_id(delete.selection.as_ref())?,
        }),
        "blocked_dates" => {
            let filters = Filters::collect(delete.selection.as_ref())?;
            Ok(Command::UnblockDate {
                court_id: parse_ulid(filters.eq("court_id")?)?,
                date: parse_date_expr(filters.eq("date")?)?,
            })
        }
        "reservations" => Err(SqlError::Unsupported(
            "reservations are never deleted; UPDATE reservations SET state = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&first.relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "courts" => Ok(Command::SelectCourts {
            id: filters.get(BinaryOperator::Eq, "id").map(parse_ulid).transpose()?,
        }),
        "reservations" => {
            let filter = if let Some(id) = filters.get(BinaryOperator::Eq, "id") {
                ReservationFilter::Id(parse_ulid(id)?)
            } else if let Some(user) = filters.get(BinaryOperator::Eq, "user_id") {
                ReservationFilter::User(parse_string(user)?)
            } else {
                ReservationFilter::Day {
                    court_id: parse_ulid(filters.eq("court_id")?)?,
                    date: parse_date_expr(filters.eq("date")?)?,
                }
            };
            Ok(Command::SelectReservations { filter })
        }
        "slots" => Ok(Command::SelectSlots {
            court_id: parse_ulid(filters.eq("court_id")?)?,
            date: parse_date_expr(filters.eq("date")?)?,
        }),
        "free_ranges" => Ok(Command::SelectFreeRanges {
            court_id: parse_ulid(filters.eq("court_id")?)?,
            date: parse_date_expr(filters.eq("date")?)?,
            min_duration: filters
                .get(BinaryOperator::Eq, "min_duration")
                .map(parse_u32)
                .transpose()?,
        }),
        "report" => Ok(Command::SelectReport {
            court_id: parse_ulid(filters.eq("court_id")?)?,
            from: parse_date_expr(
                filters
                    .get(BinaryOperator::GtEq, "date")
                    .ok_or(SqlError::MissingFilter("\"date\" >="))?,
            )?,
            to: parse_date_expr(
                filters
                    .get(BinaryOperator::LtEq, "date")
                    .ok_or(SqlError::MissingFilter("\"date\" <="))?,
            )?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col op value` conjuncts of a WHERE clause. Only AND is understood.
struct Filters<'a>(Vec<(String, BinaryOperator, &'a Expr)>);

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut out = Vec::new();
        if let Some(expr) = selection {
            Self::walk(expr, &mut out)?;
        }
        Ok(Self(out))
    }

    fn walk(expr: &'a Expr, out: &mut Vec<(String, BinaryOperator, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::walk(inner, out),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                Self::walk(left, out)?;
                Self::walk(right, out)
            }
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                out.push((col, op.clone(), right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn get(&self, op: BinaryOperator, col: &str) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(BinaryOperator::Eq, col).ok_or(SqlError::MissingFilter(col))
    }
}

fn where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    parse_ulid(Filters::collect(selection)?.eq("id")?)
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
    let first = tables_with_joins
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
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
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
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

fn extract_value(expr: &Expr) -> Result<&Value, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Ok(value),
        _ => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr)? {
        Value::SingleQuotedString(s) => Ok(s.clone()),
        other => Err(SqlError::Parse(format!("expected string, got {other}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr)? {
        Value::Null => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string(expr)?).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_time(expr: &Expr) -> Result<Minutes, SqlError> {
    parse_hhmm(&parse_string(expr)?).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_weekdays_or_null(expr: &Expr) -> Result<Option<Vec<Weekday>>, SqlError> {
    match parse_string_or_null(expr)? {
        None => Ok(None),
        Some(s) => parse_weekdays(&s)
            .map(Some)
            .map_err(|e| SqlError::Parse(e.to_string())),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    match extract_value(expr)? {
        Value::Number(s, _) | Value::SingleQuotedString(s) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}"))),
        other => Err(SqlError::Parse(format!("expected number, got {other}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr)? {
        Value::Boolean(b) => Ok(*b),
        Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        other => Err(SqlError::Parse(format!("expected bool, got {other}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
