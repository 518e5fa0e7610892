use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Minute, Weekday};
use crate::timegrid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProfessional {
        id: Ulid,
        name: Option<String>,
    },
    UpdateProfessional {
        id: Ulid,
        name: Option<String>,
    },
    DeleteProfessional {
        id: Ulid,
    },
    InsertWindow {
        id: Ulid,
        professional_id: Ulid,
        weekday: Weekday,
        start: Minute,
        end: Minute,
    },
    DeleteWindow {
        id: Ulid,
    },
    InsertBreak {
        id: Ulid,
        professional_id: Ulid,
        start: Minute,
        end: Minute,
    },
    DeleteBreak {
        id: Ulid,
    },
    InsertDayOff {
        id: Ulid,
        professional_id: Ulid,
        day: NaiveDate,
    },
    DeleteDayOff {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        professional_id: Ulid,
        day: NaiveDate,
        start: Minute,
        duration: Minute,
        customer: Option<String>,
    },
    UpdateAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    SelectProfessionals,
    SelectWindows {
        professional_id: Ulid,
    },
    SelectBreaks {
        professional_id: Ulid,
    },
    SelectDaysOff {
        professional_id: Ulid,
    },
    SelectAppointments {
        professional_id: Ulid,
        day: Option<NaiveDate>,
    },
    SelectSlots {
        professional_id: Ulid,
        day: NaiveDate,
        duration: Minute,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "professionals" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("professionals", 1, 0));
            }
            let id = parse_ulid_expr(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            Ok(Command::InsertProfessional { id, name })
        }
        "work_windows" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("work_windows", 5, values.len()));
            }
            Ok(Command::InsertWindow {
                id: parse_ulid_expr(&values[0])?,
                professional_id: parse_ulid_expr(&values[1])?,
                weekday: parse_weekday(&values[2])?,
                start: parse_time(&values[3])?,
                end: parse_time(&values[4])?,
            })
        }
        "breaks" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("breaks", 4, values.len()));
            }
            Ok(Command::InsertBreak {
                id: parse_ulid_expr(&values[0])?,
                professional_id: parse_ulid_expr(&values[1])?,
                start: parse_time(&values[2])?,
                end: parse_time(&values[3])?,
            })
        }
        "days_off" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("days_off", 3, values.len()));
            }
            Ok(Command::InsertDayOff {
                id: parse_ulid_expr(&values[0])?,
                professional_id: parse_ulid_expr(&values[1])?,
                day: parse_date(&values[2])?,
            })
        }
        "appointments" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("appointments", 5, values.len()));
            }
            let customer = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertAppointment {
                id: parse_ulid_expr(&values[0])?,
                professional_id: parse_ulid_expr(&values[1])?,
                day: parse_date(&values[2])?,
                start: parse_time(&values[3])?,
                duration: parse_i64_expr(&values[4])?,
                customer,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        // Appointments are never deleted. History stays; the status changes.
        "appointments" => {
            return Err(SqlError::Unsupported(
                "appointments cannot be deleted; UPDATE status instead".into(),
            ));
        }
        "professionals" | "work_windows" | "breaks" | "days_off" => {}
        _ => return Err(SqlError::UnknownTable(table)),
    }

    let id = extract_where_id(&delete.selection)?;
    Ok(match table.as_str() {
        "professionals" => Command::DeleteProfessional { id },
        "work_windows" => Command::DeleteWindow { id },
        "breaks" => Command::DeleteBreak { id },
        _ => Command::DeleteDayOff { id },
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let (col, value) = single_assignment(assignments)?;

    match (table.as_str(), col.as_str()) {
        ("appointments", "status") => {
            let s = parse_string_expr(value)?;
            let status = AppointmentStatus::parse(&s)
                .ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))?;
            Ok(Command::UpdateAppointmentStatus { id, status })
        }
        ("professionals", "name") => Ok(Command::UpdateProfessional {
            id,
            name: parse_string_or_null(value)?,
        }),
        ("appointments", _) | ("professionals", _) => {
            Err(SqlError::Unsupported(format!("cannot update column {col}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "professionals" => Ok(Command::SelectProfessionals),
        "work_windows" => Ok(Command::SelectWindows {
            professional_id: require_ulid(&filters, "professional_id")?,
        }),
        "breaks" => Ok(Command::SelectBreaks {
            professional_id: require_ulid(&filters, "professional_id")?,
        }),
        "days_off" => Ok(Command::SelectDaysOff {
            professional_id: require_ulid(&filters, "professional_id")?,
        }),
        "appointments" => {
            let day = match find_filter(&filters, "day") {
                Some(expr) => Some(parse_date(expr)?),
                None => None,
            };
            Ok(Command::SelectAppointments {
                professional_id: require_ulid(&filters, "professional_id")?,
                day,
            })
        }
        "slots" => {
            let duration = find_filter(&filters, "duration")
                .ok_or(SqlError::MissingFilter("duration"))
                .and_then(parse_i64_expr)?;
            Ok(Command::SelectSlots {
                professional_id: require_ulid(&filters, "professional_id")?,
                day: find_filter(&filters, "day")
                    .ok_or(SqlError::MissingFilter("day"))
                    .and_then(parse_date)?,
                duration,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten an AND-tree of `col = value` comparisons into (column, value) pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
                Ok(())
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left:?}")))?;
                out.push((col, right));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op} in WHERE"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => Err(SqlError::Unsupported(format!("WHERE clause {expr}"))),
    }
}

fn find_filter<'a>(filters: &[(String, &'a Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
}

fn require_ulid(filters: &[(String, &Expr)], col: &'static str) -> Result<Ulid, SqlError> {
    find_filter(filters, col)
        .ok_or(SqlError::MissingFilter(col))
        .and_then(parse_ulid_expr)
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
        SetExpr::Values(values) => match values.rows.len() {
            0 => Err(SqlError::Parse("empty VALUES".into())),
            1 => Ok(values.rows[0].clone()),
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn single_assignment(assignments: &[ast::Assignment]) -> Result<(String, &Expr), SqlError> {
    if assignments.len() != 1 {
        return Err(SqlError::Unsupported("multi-column UPDATE".into()));
    }
    let assignment = &assignments[0];
    let col = match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
        }
        _ => return Err(SqlError::Unsupported("tuple assignment".into())),
    };
    Ok((col, &assignment.value))
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

/// 'HH:MM' literal → minutes since midnight.
fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string_expr(expr)?;
    timegrid::to_minutes(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

/// 'YYYY-MM-DD' literal → civil date.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    timegrid::parse_date(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    let s = parse_string_expr(expr)?;
    Weekday::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown weekday: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
