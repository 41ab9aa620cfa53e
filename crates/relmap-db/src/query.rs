//! Query façade.
//!
//! A [`Query`] is built with chained calls and executed with [`Query::all`],
//! [`Query::first`], [`Query::one`] or [`Query::count`]. Builder calls never
//! fail on their own; the first invalid column or relationship is reported
//! as [`Error::Schema`] when the query runs.
//!
//! Root rows are always de-duplicated by primary key, so joining across a
//! collection to filter never repeats a parent.

use std::fmt;

use relmap_common::{Error, Result};

use crate::instance::Instance;
use crate::loader::{self, JoinedSegment, LoadStrategy};
use crate::schema::{Cardinality, EntitySchema, RelationshipDef};
use crate::session::Session;
use crate::value::Value;

#[derive(Debug, Clone)]
enum Filter {
    /// `root.column = value`
    Column { column: String, value: Value },
    /// `joined.column = value` across an inner join
    Related {
        relationship: String,
        column: String,
        value: Value,
    },
    /// at least one related row has `column = value`
    Any {
        relationship: String,
        column: String,
        value: Value,
    },
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Column { column, value } => write!(f, "{column} = {value}"),
            Filter::Related {
                relationship,
                column,
                value,
            } => write!(f, "{relationship}.{column} = {value}"),
            Filter::Any {
                relationship,
                column,
                value,
            } => write!(f, "{relationship}.any({column} = {value})"),
        }
    }
}

fn equals(expr: &str, value: &Value, params: &mut Vec<Value>) -> String {
    if value.is_null() {
        format!("{expr} IS NULL")
    } else {
        params.push(value.clone());
        format!("{expr} = ?")
    }
}

/// Render the join from `t0` along `rel`, naming the target `alias`.
fn join_sql(
    kind: &str,
    rel: &RelationshipDef,
    target: &EntitySchema,
    alias: &str,
    assoc_alias: &str,
) -> Result<String> {
    Ok(match rel.cardinality {
        Cardinality::ManyToMany => {
            let assoc = rel.association()?;
            format!(
                "{kind} {assoc_table} {assoc_alias} ON {assoc_alias}.{assoc_local} = t0.{local} \
                 {kind} {table} {alias} ON {alias}.{remote} = {assoc_alias}.{assoc_remote}",
                assoc_table = assoc.table,
                assoc_local = assoc.local_column,
                assoc_remote = assoc.remote_column,
                local = rel.local_column,
                table = target.table,
                remote = rel.remote_column
            )
        }
        _ => format!(
            "{kind} {table} {alias} ON {alias}.{remote} = t0.{local}",
            table = target.table,
            remote = rel.remote_column,
            local = rel.local_column
        ),
    })
}

/// A filtered retrieval over one entity type.
#[derive(Clone)]
pub struct Query<'s> {
    session: &'s Session<'s>,
    entity: String,
    joins: Vec<String>,
    filters: Vec<Filter>,
    options: Vec<(String, LoadStrategy)>,
    order: Vec<String>,
    error: Option<String>,
}

impl<'s> Query<'s> {
    pub fn new(session: &'s Session<'s>, entity_type: &str) -> Self {
        let query = Self {
            session,
            entity: entity_type.to_string(),
            joins: Vec::new(),
            filters: Vec::new(),
            options: Vec::new(),
            order: Vec::new(),
            error: None,
        };
        let known = session.registry().describe(entity_type).map(|_| ());
        query.check(known)
    }

    fn check(mut self, result: Result<()>) -> Self {
        if let Err(err) = result {
            if self.error.is_none() {
                self.error = Some(match err {
                    Error::Schema(msg) => msg,
                    other => other.to_string(),
                });
            }
        }
        self
    }

    fn root_column(&self, column: &str) -> Result<()> {
        let root = self.session.registry().describe(&self.entity)?;
        if root.has_column(column) {
            Ok(())
        } else {
            Err(Error::schema(format!(
                "entity type '{}' has no column '{column}'",
                self.entity
            )))
        }
    }

    fn relationship(&self, name: &str) -> Result<&'s RelationshipDef> {
        self.session.registry().relationship(&self.entity, name)
    }

    fn target_column(&self, relationship: &str, column: &str) -> Result<()> {
        let rel = self.relationship(relationship)?;
        let target = self.session.registry().describe(&rel.target)?;
        if target.has_column(column) {
            Ok(())
        } else {
            Err(Error::schema(format!(
                "entity type '{}' has no column '{column}'",
                rel.target
            )))
        }
    }

    /// Keep rows whose `column` equals `value`.
    pub fn filter_by(self, column: &str, value: impl Into<Value>) -> Self {
        let result = self.root_column(column);
        let mut query = self.check(result);
        query.filters.push(Filter::Column {
            column: column.to_string(),
            value: value.into(),
        });
        query
    }

    /// Inner-join a relationship of the root entity.
    pub fn join(mut self, relationship: &str) -> Self {
        let result = self.relationship(relationship).map(|_| ());
        if result.is_ok() && !self.joins.iter().any(|j| j == relationship) {
            self.joins.push(relationship.to_string());
        }
        self.check(result)
    }

    /// Keep rows joined to a related row whose `column` equals `value`.
    /// Joins `relationship` when not joined yet.
    pub fn filter_related(self, relationship: &str, column: &str, value: impl Into<Value>) -> Self {
        let query = self.join(relationship);
        let result = query.target_column(relationship, column);
        let mut query = query.check(result);
        query.filters.push(Filter::Related {
            relationship: relationship.to_string(),
            column: column.to_string(),
            value: value.into(),
        });
        query
    }

    /// Keep rows with at least one related row whose `column` equals `value`.
    pub fn any(self, relationship: &str, column: &str, value: impl Into<Value>) -> Self {
        let result = self.target_column(relationship, column);
        let mut query = self.check(result);
        query.filters.push(Filter::Any {
            relationship: relationship.to_string(),
            column: column.to_string(),
            value: value.into(),
        });
        query
    }

    /// Choose the loader strategy of a relationship. The last call wins.
    pub fn options(mut self, relationship: &str, strategy: LoadStrategy) -> Self {
        let result = self.relationship(relationship).map(|_| ());
        if result.is_ok() {
            self.options.retain(|(name, _)| name != relationship);
            self.options.push((relationship.to_string(), strategy));
        }
        self.check(result)
    }

    pub fn selectin(self, relationship: &str) -> Self {
        self.options(relationship, LoadStrategy::SelectIn)
    }

    pub fn joined(self, relationship: &str) -> Self {
        self.options(relationship, LoadStrategy::Joined)
    }

    /// Populate `relationship` from its filtering join; requires
    /// [`Query::join`] (or [`Query::filter_related`]) on the same edge.
    pub fn contains_eager(self, relationship: &str) -> Self {
        self.options(relationship, LoadStrategy::ContainsEager)
    }

    /// Order by a root column ahead of the primary key.
    pub fn order_by(self, column: &str) -> Self {
        let result = self.root_column(column);
        let mut query = self.check(result);
        query.order.push(column.to_string());
        query
    }

    fn ensure_valid(&self) -> Result<()> {
        match self.error {
            Some(ref msg) => Err(Error::schema(msg.clone())),
            None => Ok(()),
        }
    }

    /// Inner joins of the filters and whether they can repeat root rows.
    fn filter_joins(&self) -> Result<(Vec<String>, bool)> {
        let registry = self.session.registry();
        let mut joins = Vec::new();
        let mut multiplies = false;
        for (i, name) in self.joins.iter().enumerate() {
            let rel = self.relationship(name)?;
            let target = registry.describe(&rel.target)?;
            multiplies |= rel.is_collection();
            joins.push(join_sql("JOIN", rel, target, &format!("j{i}"), &format!("ja{i}"))?);
        }
        Ok((joins, multiplies))
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> Result<String> {
        let registry = self.session.registry();
        let mut terms = Vec::new();
        for (n, filter) in self.filters.iter().enumerate() {
            let term = match filter {
                Filter::Column { column, value } => equals(&format!("t0.{column}"), value, params),
                Filter::Related {
                    relationship,
                    column,
                    value,
                } => {
                    let i = self
                        .joins
                        .iter()
                        .position(|j| j == relationship)
                        .ok_or_else(|| Error::Internal(format!("{relationship} is not joined")))?;
                    equals(&format!("j{i}.{column}"), value, params)
                }
                Filter::Any {
                    relationship,
                    column,
                    value,
                } => {
                    let rel = self.relationship(relationship)?;
                    let target = registry.describe(&rel.target)?;
                    let alias = format!("x{n}");
                    let inner = match rel.cardinality {
                        Cardinality::ManyToMany => {
                            let assoc = rel.association()?;
                            format!(
                                "SELECT 1 FROM {assoc_table} xa{n} \
                                 JOIN {table} {alias} ON {alias}.{remote} = xa{n}.{assoc_remote} \
                                 WHERE xa{n}.{assoc_local} = t0.{local}",
                                assoc_table = assoc.table,
                                table = target.table,
                                remote = rel.remote_column,
                                assoc_remote = assoc.remote_column,
                                assoc_local = assoc.local_column,
                                local = rel.local_column
                            )
                        }
                        _ => format!(
                            "SELECT 1 FROM {table} {alias} WHERE {alias}.{remote} = t0.{local}",
                            table = target.table,
                            remote = rel.remote_column,
                            local = rel.local_column
                        ),
                    };
                    let matched = equals(&format!("{alias}.{column}"), value, params);
                    format!("EXISTS ({inner} AND {matched})")
                }
            };
            terms.push(term);
        }
        Ok(terms.join(" AND "))
    }

    fn fetch(&self, limit: Option<usize>) -> Result<Vec<Instance>> {
        self.ensure_valid()?;
        let registry = self.session.registry();
        let root = registry.describe(&self.entity)?;

        let (mut joins, mut multiplies) = self.filter_joins()?;
        let mut columns = vec![root.select_list("t0")];
        let mut order: Vec<String> = self.order.iter().map(|c| format!("t0.{c}")).collect();
        order.push(format!("t0.{}", root.primary_key()));

        let mut segments = Vec::new();
        let mut selectin = Vec::new();
        let mut offset = root.fields.len();
        for (i, (name, strategy)) in self.options.iter().enumerate() {
            let rel = self.relationship(name)?;
            let target = registry.describe(&rel.target)?;
            let (alias, assoc_alias) = match strategy {
                LoadStrategy::Lazy => continue,
                LoadStrategy::SelectIn => {
                    selectin.push(name.as_str());
                    continue;
                }
                LoadStrategy::Joined => {
                    let (alias, assoc_alias) = (format!("e{i}"), format!("ea{i}"));
                    joins.push(join_sql("LEFT OUTER JOIN", rel, target, &alias, &assoc_alias)?);
                    (alias, assoc_alias)
                }
                LoadStrategy::ContainsEager => {
                    let j = self.joins.iter().position(|j| j == name).ok_or_else(|| {
                        Error::schema(format!("contains_eager({name}) requires join({name})"))
                    })?;
                    (format!("j{j}"), format!("ja{j}"))
                }
            };
            multiplies |= rel.is_collection();
            columns.push(target.select_list(&alias));
            if rel.is_collection() {
                order.push(loader::member_order(rel, target, &alias, &assoc_alias));
            }
            segments.push(JoinedSegment {
                name: name.as_str(),
                rel,
                target,
                offset,
            });
            offset += target.fields.len();
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {} t0", columns.join(", "), root.table);
        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }
        let filter = self.where_clause(&mut params)?;
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
        if let (Some(n), false) = (limit, multiplies) {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let rows = self.session.fetch_rows(&sql, &params)?;
        let mut results = loader::assemble_joined(root, &segments, rows)?;
        if let Some(n) = limit {
            results.truncate(n);
        }
        for name in selectin {
            loader::load_selectin(self.session, &mut results, name)?;
        }

        tracing::debug!(entity = %self.entity, results = results.len(), "query");
        Ok(results)
    }

    /// Every matching entity, root primary key ascending unless
    /// [`Query::order_by`] says otherwise.
    pub fn all(&self) -> Result<Vec<Instance>> {
        self.fetch(None)
    }

    pub fn first(&self) -> Result<Option<Instance>> {
        Ok(self.fetch(Some(1))?.into_iter().next())
    }

    /// Exactly one match: `NotFound` for none, `MultipleResults` for more.
    pub fn one(&self) -> Result<Instance> {
        let mut results = self.all()?;
        match results.len() {
            0 => Err(Error::not_found(&self.entity, self.describe())),
            1 => Ok(results.remove(0)),
            n => Err(Error::multiple_results(&self.entity, n)),
        }
    }

    /// Number of distinct matching entities.
    pub fn count(&self) -> Result<usize> {
        self.ensure_valid()?;
        let root = self.session.registry().describe(&self.entity)?;
        let (joins, _) = self.filter_joins()?;

        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT COUNT(DISTINCT t0.{}) FROM {} t0",
            root.primary_key(),
            root.table
        );
        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }
        let filter = self.where_clause(&mut params)?;
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }

        let rows = self.session.fetch_rows(&sql, &params)?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Human readable filter list, used in `NotFound` errors.
    pub fn describe(&self) -> String {
        if self.filters.is_empty() {
            return "<all>".to_string();
        }
        self.filters
            .iter()
            .map(Filter::to_string)
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
