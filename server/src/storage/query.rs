//! Document-store query AST.
//!
//! Handlers express queries as a small JSON expression tree
//! (`{"where": {"op": "eq", "field": "age", "value": 3}, "limit": 10}`);
//! the server parses and validates it here and the store adapter translates
//! the typed AST into parameterized SQL. Field names never reach the SQL
//! text unescaped: they are bound as `json_extract` path parameters.

use serde_json::Value;

use crate::prelude::*;

/// Maximum nesting depth of and/or expressions
const MAX_DEPTH: usize = 8;
/// Maximum number of values in an `in` list
const MAX_IN_VALUES: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Where {
	Eq(Box<str>, Value),
	Lt(Box<str>, Value),
	Gt(Box<str>, Value),
	In(Box<str>, Vec<Value>),
	And(Vec<Where>),
	Or(Vec<Where>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
	Asc,
	Desc,
}

#[derive(Debug, Clone, Default)]
pub struct DocQuery {
	pub filter: Option<Where>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
	/// `(field, direction)`; None orders by creation time
	pub order: Option<(Box<str>, Order)>,
}

/// Field names are restricted to dotted identifier paths so they can be
/// turned into `$.a.b` JSON paths without escaping concerns.
fn parse_field(v: &Value) -> FzResult<Box<str>> {
	let s = v.as_str().ok_or_else(|| Error::Validation("query field must be a string".into()))?;
	if s.is_empty() || s.len() > 128 {
		return Err(Error::Validation("query field length out of range".into()));
	}
	let ok = s.split('.').all(|seg| {
		!seg.is_empty()
			&& seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
			&& !seg.starts_with(|c: char| c.is_ascii_digit())
	});
	if !ok {
		return Err(Error::Validation(format!("invalid query field: {}", s)));
	}
	Ok(Box::from(s))
}

fn parse_where(v: &Value, depth: usize) -> FzResult<Where> {
	if depth > MAX_DEPTH {
		return Err(Error::Validation("query nesting too deep".into()));
	}
	let obj = v.as_object().ok_or_else(|| Error::Validation("where must be an object".into()))?;
	let op = obj
		.get("op")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Validation("where missing op".into()))?;

	match op {
		"eq" | "lt" | "gt" => {
			let field = parse_field(
				obj.get("field").ok_or_else(|| Error::Validation("where missing field".into()))?,
			)?;
			let value = obj
				.get("value")
				.cloned()
				.ok_or_else(|| Error::Validation("where missing value".into()))?;
			Ok(match op {
				"eq" => Where::Eq(field, value),
				"lt" => Where::Lt(field, value),
				_ => Where::Gt(field, value),
			})
		}
		"in" => {
			let field = parse_field(
				obj.get("field").ok_or_else(|| Error::Validation("where missing field".into()))?,
			)?;
			let values = obj
				.get("values")
				.and_then(Value::as_array)
				.ok_or_else(|| Error::Validation("in requires a values array".into()))?;
			if values.is_empty() || values.len() > MAX_IN_VALUES {
				return Err(Error::Validation("in values count out of range".into()));
			}
			Ok(Where::In(field, values.clone()))
		}
		"and" | "or" => {
			let exprs = obj
				.get("exprs")
				.and_then(Value::as_array)
				.ok_or_else(|| Error::Validation("and/or requires an exprs array".into()))?;
			if exprs.is_empty() {
				return Err(Error::Validation("and/or requires at least one expr".into()));
			}
			let parsed = exprs
				.iter()
				.map(|e| parse_where(e, depth + 1))
				.collect::<FzResult<Vec<_>>>()?;
			Ok(if op == "and" { Where::And(parsed) } else { Where::Or(parsed) })
		}
		_ => Err(Error::Validation(format!("unknown query op: {}", op))),
	}
}

impl DocQuery {
	/// Parse the JSON query object a handler passes to
	/// `fazt.storage.ds.collection(..).query(..)`.
	pub fn from_json(v: &Value) -> FzResult<DocQuery> {
		if v.is_null() {
			return Ok(DocQuery::default());
		}
		let obj =
			v.as_object().ok_or_else(|| Error::Validation("query must be an object".into()))?;

		let filter = match obj.get("where") {
			None | Some(Value::Null) => None,
			Some(w) => Some(parse_where(w, 0)?),
		};
		let limit = match obj.get("limit") {
			None | Some(Value::Null) => None,
			Some(v) => Some(
				v.as_u64()
					.filter(|n| *n > 0 && *n <= 1000)
					.ok_or_else(|| Error::Validation("limit out of range".into()))? as u32,
			),
		};
		let offset = match obj.get("offset") {
			None | Some(Value::Null) => None,
			Some(v) => Some(
				v.as_u64().ok_or_else(|| Error::Validation("offset must be a number".into()))?
					as u32,
			),
		};
		let order = match obj.get("order") {
			None | Some(Value::Null) => None,
			Some(v) => {
				let s = v
					.as_str()
					.ok_or_else(|| Error::Validation("order must be a string".into()))?;
				let (field, dir) = match s.strip_prefix('-') {
					Some(rest) => (rest, Order::Desc),
					None => (s, Order::Asc),
				};
				Some((parse_field(&Value::String(field.to_string()))?, dir))
			}
		};

		Ok(DocQuery { filter, limit, offset, order })
	}

	/// JSON path (`$.a.b`) for a validated field name.
	pub fn json_path(field: &str) -> String {
		format!("$.{}", field)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_simple_eq() {
		let q = DocQuery::from_json(&json!({
			"where": {"op": "eq", "field": "status", "value": "open"},
			"limit": 10
		}))
		.unwrap();
		assert_eq!(q.limit, Some(10));
		assert_eq!(q.filter, Some(Where::Eq("status".into(), json!("open"))));
	}

	#[test]
	fn parses_nested_and_or() {
		let q = DocQuery::from_json(&json!({
			"where": {"op": "and", "exprs": [
				{"op": "gt", "field": "age", "value": 21},
				{"op": "or", "exprs": [
					{"op": "eq", "field": "country", "value": "hu"},
					{"op": "in", "field": "tier", "values": ["pro", "team"]}
				]}
			]}
		}))
		.unwrap();
		match q.filter {
			Some(Where::And(exprs)) => assert_eq!(exprs.len(), 2),
			other => panic!("expected And, got {:?}", other),
		}
	}

	#[test]
	fn rejects_bad_fields() {
		assert!(
			DocQuery::from_json(&json!({
				"where": {"op": "eq", "field": "a'); DROP TABLE", "value": 1}
			}))
			.is_err()
		);
		assert!(
			DocQuery::from_json(&json!({
				"where": {"op": "eq", "field": "", "value": 1}
			}))
			.is_err()
		);
	}

	#[test]
	fn rejects_unknown_op_and_deep_nesting() {
		assert!(
			DocQuery::from_json(&json!({"where": {"op": "like", "field": "a", "value": 1}}))
				.is_err()
		);

		let mut w = json!({"op": "eq", "field": "a", "value": 1});
		for _ in 0..12 {
			w = json!({"op": "and", "exprs": [w]});
		}
		assert!(DocQuery::from_json(&json!({ "where": w })).is_err());
	}

	#[test]
	fn order_prefix_dash_descends() {
		let q = DocQuery::from_json(&json!({"order": "-created"})).unwrap();
		assert_eq!(q.order, Some(("created".into(), Order::Desc)));
	}
}

// vim: ts=4
