//! Tools the table agent can call.
//!
//! Every tool runs polars expressions over the full combined table, so
//! answers never depend on the sample shown in the prompt. Results and
//! errors are returned as JSON text for the model to read.

use polars::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::data_registry::{cell_text, CombinedTable};
use crate::types::ToolSpec;

const MAX_ROWS_PER_CALL: usize = 50;
const DEFAULT_VALUE_COUNTS: usize = 20;

#[derive(Debug, Deserialize)]
struct RowFilter {
    where_column: Option<String>,
    where_equals: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetRowsArgs {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(flatten)]
    filter: RowFilter,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum AggregateOp {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Distinct,
}

#[derive(Debug, Deserialize)]
struct AggregateArgs {
    column: String,
    operation: AggregateOp,
    #[serde(flatten)]
    filter: RowFilter,
}

#[derive(Debug, Deserialize)]
struct ValueCountsArgs {
    column: String,
    limit: Option<usize>,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    let filter_props = json!({
        "where_column": {"type": "string", "description": "Only consider rows where this column..."},
        "where_equals": {"type": "string", "description": "...equals this value (case-insensitive)"}
    });
    let mut get_rows_props = json!({
        "offset": {"type": "integer", "minimum": 0},
        "limit": {"type": "integer", "minimum": 1, "maximum": MAX_ROWS_PER_CALL}
    });
    let mut aggregate_props = json!({
        "column": {"type": "string"},
        "operation": {
            "type": "string",
            "enum": ["count", "sum", "mean", "median", "min", "max", "std", "distinct"]
        }
    });
    for props in [&mut get_rows_props, &mut aggregate_props] {
        if let (Some(target), Some(extra)) = (props.as_object_mut(), filter_props.as_object()) {
            target.extend(extra.clone());
        }
    }

    vec![
        ToolSpec {
            name: "table_info".to_string(),
            description: "Column names, column types and total row count of the table.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "get_rows".to_string(),
            description: format!(
                "Return up to {} rows starting at offset, optionally filtered by one column value.",
                MAX_ROWS_PER_CALL
            ),
            parameters: json!({"type": "object", "properties": get_rows_props}),
        },
        ToolSpec {
            name: "aggregate".to_string(),
            description: "Compute a statistic over every row of one column. Numeric operations skip cells that are not numbers.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": aggregate_props,
                "required": ["column", "operation"]
            }),
        },
        ToolSpec {
            name: "value_counts".to_string(),
            description: "Most frequent values of a column with their counts.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "column": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["column"]
            }),
        },
    ]
}

/// Run one tool call and return its JSON output
pub fn execute(table: &CombinedTable, name: &str, arguments: &str) -> String {
    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    let result = match name {
        "table_info" => Ok(table_info(table)),
        "get_rows" => parse_args(arguments).and_then(|args| get_rows(table, args)),
        "aggregate" => parse_args(arguments).and_then(|args| aggregate(table, args)),
        "value_counts" => parse_args(arguments).and_then(|args| value_counts(table, args)),
        other => Err(format!("unknown tool '{}'", other)),
    };
    match result {
        Ok(value) => value.to_string(),
        Err(message) => json!({ "error": message }).to_string(),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("invalid arguments: {}", e))
}

fn polars_error(e: PolarsError) -> String {
    format!("table operation failed: {}", e)
}

fn check_column(table: &CombinedTable, name: &str) -> Result<(), String> {
    if table.has_column(name) {
        Ok(())
    } else {
        Err(format!(
            "unknown column '{}'; available columns: {}",
            name,
            table.columns().join(", ")
        ))
    }
}

fn table_info(table: &CombinedTable) -> Value {
    let types: serde_json::Map<String, Value> = table
        .frame()
        .get_columns()
        .iter()
        .map(|s| (s.name().to_string(), json!(s.dtype().to_string())))
        .collect();
    json!({
        "columns": table.columns(),
        "types": types,
        "row_count": table.row_count(),
    })
}

/// Rows whose `where_column`, as lowercase text, equals `where_equals`
fn filtered(table: &CombinedTable, filter: &RowFilter) -> Result<DataFrame, String> {
    match (&filter.where_column, &filter.where_equals) {
        (Some(column), Some(value)) => {
            check_column(table, column)?;
            let wanted = value.trim().to_lowercase();
            table
                .frame()
                .clone()
                .lazy()
                .filter(col(column).cast(DataType::String).str().to_lowercase().eq(lit(wanted)))
                .collect()
                .map_err(polars_error)
        }
        (None, None) => Ok(table.frame().clone()),
        _ => Err("where_column and where_equals must be given together".to_string()),
    }
}

fn get_rows(table: &CombinedTable, args: GetRowsArgs) -> Result<Value, String> {
    let frame = filtered(table, &args.filter)?;
    let limit = args.limit.clamp(1, MAX_ROWS_PER_CALL);
    let page = frame.slice(args.offset as i64, limit);
    let rows: Vec<Vec<Value>> = (0..page.height())
        .map(|i| {
            page.get_columns()
                .iter()
                .map(|s| s.get(i).map(|v| cell_json(&v)).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(json!({
        "columns": table.columns(),
        "matching_rows": frame.height(),
        "offset": args.offset,
        "rows": rows,
    }))
}

fn cell_json(value: &AnyValue) -> Value {
    if matches!(value, AnyValue::Null) {
        return Value::Null;
    }
    let dtype = value.dtype();
    if dtype.is_integer() {
        if let Some(n) = value.extract::<i64>() {
            return json!(n);
        }
    }
    if dtype.is_float() {
        if let Some(n) = value.extract::<f64>() {
            return json!(n);
        }
    }
    json!(cell_text(value))
}

fn aggregate(table: &CombinedTable, args: AggregateArgs) -> Result<Value, String> {
    check_column(table, &args.column)?;
    let frame = filtered(table, &args.filter)?;
    let rows_considered = frame.height();
    let target = col(&args.column);

    let value = match args.operation {
        AggregateOp::Count => json!(scalar(&frame, target.count())?.extract::<u64>()),
        AggregateOp::Distinct => json!(scalar(&frame, target.drop_nulls().n_unique())?.extract::<u64>()),
        op => {
            // Cells that are not numbers become nulls and are skipped
            let numbers = target.cast(DataType::Float64);
            let stat = match op {
                AggregateOp::Sum => numbers.clone().sum(),
                AggregateOp::Mean => numbers.clone().mean(),
                AggregateOp::Median => numbers.clone().median(),
                AggregateOp::Min => numbers.clone().min(),
                AggregateOp::Max => numbers.clone().max(),
                _ => numbers.clone().std(1),
            };
            let stats = frame
                .lazy()
                .select([numbers.count().alias("n"), stat.alias("value")])
                .collect()
                .map_err(polars_error)?;
            let n = first_value(&stats, "n")?.extract::<u64>().unwrap_or(0);
            if n == 0 {
                return Err(format!("column '{}' has no numeric values", args.column));
            }
            if op == AggregateOp::Std && n < 2 {
                return Err("standard deviation needs at least two numeric values".to_string());
            }
            json!(first_value(&stats, "value")?.extract::<f64>())
        }
    };

    Ok(json!({
        "column": args.column,
        "operation": format!("{:?}", args.operation).to_lowercase(),
        "rows_considered": rows_considered,
        "result": value,
    }))
}

fn scalar(frame: &DataFrame, expr: Expr) -> Result<AnyValue<'static>, String> {
    let out = frame
        .clone()
        .lazy()
        .select([expr.alias("value")])
        .collect()
        .map_err(polars_error)?;
    first_value(&out, "value")
}

fn first_value(frame: &DataFrame, column: &str) -> Result<AnyValue<'static>, String> {
    frame
        .column(column)
        .and_then(|s| s.get(0))
        .and_then(|v| v.into_static())
        .map_err(polars_error)
}

fn value_counts(table: &CombinedTable, args: ValueCountsArgs) -> Result<Value, String> {
    check_column(table, &args.column)?;
    let counts = table
        .frame()
        .clone()
        .lazy()
        .group_by([col(&args.column)])
        .agg([len().alias("count")])
        .collect()
        .map_err(polars_error)?;

    let keys = counts.column(&args.column).map_err(polars_error)?;
    let totals = counts.column("count").map_err(polars_error)?;
    let mut sorted: Vec<(String, u64)> = (0..counts.height())
        .map(|i| {
            let key = keys.get(i).map(|v| cell_text(&v)).unwrap_or_default();
            let count = totals.get(i).ok().and_then(|v| v.extract::<u64>()).unwrap_or(0);
            (key, count)
        })
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let distinct = sorted.len();
    sorted.truncate(args.limit.unwrap_or(DEFAULT_VALUE_COUNTS).max(1));

    Ok(json!({
        "column": args.column,
        "distinct_values": distinct,
        "counts": sorted
            .into_iter()
            .map(|(value, count)| json!({"value": value, "count": count}))
            .collect::<Vec<_>>(),
    }))
}
