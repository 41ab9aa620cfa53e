//! Relationship loader strategies.
//!
//! Every strategy produces the same in-memory graph; they differ only in how
//! many statements reach storage:
//!
//! | strategy        | statements for N parents          |
//! |-----------------|-----------------------------------|
//! | `Lazy`          | 1 + one per parent accessed       |
//! | `SelectIn`      | 1 + one per eager relationship    |
//! | `Joined`        | 1 (LEFT OUTER JOIN)               |
//! | `ContainsEager` | 1 (reuses the filtering join)     |
//!
//! The joined strategies live in [`crate::query`] since they alter the main
//! statement; this module holds the per-relationship fetches and the row
//! assembly they share.

use std::collections::{HashMap, HashSet};

use relmap_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::instance::{Instance, Related};
use crate::schema::{Cardinality, EntitySchema, RelationshipDef};
use crate::session::Session;
use crate::value::Value;

/// How a relationship is populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Fetch on first access.
    #[default]
    Lazy,
    /// One `WHERE key IN (...)` statement for all parents.
    SelectIn,
    /// LEFT OUTER JOIN into the parent statement, parents de-duplicated.
    Joined,
    /// Populate from an inner join the query already filters on.
    ContainsEager,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Lazy => "lazy",
            LoadStrategy::SelectIn => "selectin",
            LoadStrategy::Joined => "joined",
            LoadStrategy::ContainsEager => "contains_eager",
        }
    }
}

impl std::str::FromStr for LoadStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lazy" => Ok(LoadStrategy::Lazy),
            "selectin" => Ok(LoadStrategy::SelectIn),
            "joined" => Ok(LoadStrategy::Joined),
            "contains_eager" => Ok(LoadStrategy::ContainsEager),
            other => Err(Error::Config(format!("unknown load strategy '{other}'"))),
        }
    }
}

/// ORDER BY expression for the members of `rel`.
///
/// `order_by` when declared, otherwise the target's primary key; many-to-many
/// edges without `order_by` keep association insertion order.
pub(crate) fn member_order(
    rel: &RelationshipDef,
    target: &EntitySchema,
    alias: &str,
    assoc_alias: &str,
) -> String {
    match (&rel.order_by, rel.cardinality) {
        (Some(column), _) => format!("{alias}.{column}"),
        (None, Cardinality::ManyToMany) => format!("{assoc_alias}.rowid"),
        (None, _) => format!("{alias}.{}", target.primary_key()),
    }
}

fn instances(target: &EntitySchema, rows: &[Vec<Value>]) -> Vec<Instance> {
    rows.iter()
        .map(|row| Instance::from_record(target, target.record_from_values(row)))
        .collect()
}

/// Fetch one relationship of one parent.
///
/// A parent whose key is NULL (unsaved, or a NULL foreign key) gets an empty
/// result without a statement.
pub(crate) fn load_lazy(
    session: &Session<'_>,
    parent: &Instance,
    rel: &RelationshipDef,
) -> Result<Related> {
    let target = session.registry().describe(&rel.target)?;
    let key = parent.get(&rel.local_column);
    if key.is_null() {
        return Ok(Related::empty(rel.cardinality));
    }

    let columns = target.select_list("t0");
    let order = member_order(rel, target, "t0", "a0");
    let sql = match rel.cardinality {
        Cardinality::OneToMany => format!(
            "SELECT {columns} FROM {} t0 WHERE t0.{} = ? ORDER BY {order}",
            target.table, rel.remote_column
        ),
        Cardinality::ManyToOne => format!(
            "SELECT {columns} FROM {} t0 WHERE t0.{} = ?",
            target.table, rel.remote_column
        ),
        Cardinality::ManyToMany => {
            let assoc = rel.association()?;
            format!(
                "SELECT {columns} FROM {} t0 JOIN {} a0 ON a0.{} = t0.{} \
                 WHERE a0.{} = ? ORDER BY {order}",
                target.table,
                assoc.table,
                assoc.remote_column,
                rel.remote_column,
                assoc.local_column
            )
        }
    };

    let rows = session.fetch_rows(&sql, &[key])?;
    tracing::trace!(relationship = %rel.name, rows = rows.len(), "lazy load");

    let found = instances(target, &rows);
    Ok(match rel.cardinality {
        Cardinality::ManyToOne => Related::One(found.into_iter().next().map(Box::new)),
        _ => Related::Many(found),
    })
}

/// Populate relationship `name` on every parent with a single statement.
pub(crate) fn load_selectin(
    session: &Session<'_>,
    parents: &mut [Instance],
    name: &str,
) -> Result<()> {
    let Some(first) = parents.first() else {
        return Ok(());
    };
    let rel = session.registry().relationship(first.entity_type(), name)?;
    let target = session.registry().describe(&rel.target)?;

    let mut seen = HashSet::new();
    let keys: Vec<Value> = parents
        .iter()
        .map(|p| p.get(&rel.local_column))
        .filter(|k| !k.is_null() && seen.insert(k.clone()))
        .collect();

    let mut groups: HashMap<Value, Vec<Instance>> = HashMap::new();
    if !keys.is_empty() {
        let placeholders = vec!["?"; keys.len()].join(", ");
        let columns = target.select_list("t0");
        let order = member_order(rel, target, "t0", "a0");
        let sql = match rel.cardinality {
            Cardinality::OneToMany => format!(
                "SELECT t0.{remote}, {columns} FROM {table} t0 \
                 WHERE t0.{remote} IN ({placeholders}) ORDER BY {order}",
                remote = rel.remote_column,
                table = target.table
            ),
            Cardinality::ManyToOne => format!(
                "SELECT t0.{remote}, {columns} FROM {table} t0 \
                 WHERE t0.{remote} IN ({placeholders})",
                remote = rel.remote_column,
                table = target.table
            ),
            Cardinality::ManyToMany => {
                let assoc = rel.association()?;
                format!(
                    "SELECT a0.{local}, {columns} FROM {table} t0 \
                     JOIN {assoc} a0 ON a0.{assoc_remote} = t0.{remote} \
                     WHERE a0.{local} IN ({placeholders}) ORDER BY {order}",
                    local = assoc.local_column,
                    table = target.table,
                    assoc = assoc.table,
                    assoc_remote = assoc.remote_column,
                    remote = rel.remote_column
                )
            }
        };

        let rows = session.fetch_rows(&sql, &keys)?;
        tracing::debug!(
            relationship = %rel.name,
            parents = parents.len(),
            rows = rows.len(),
            "selectin load"
        );
        for row in rows {
            let Some(group_key) = row.first().cloned() else {
                continue;
            };
            let instance = Instance::from_record(target, target.record_from_values(&row[1..]));
            groups.entry(group_key).or_default().push(instance);
        }
    }

    for parent in parents.iter_mut() {
        let members = groups
            .get(&parent.get(&rel.local_column))
            .cloned()
            .unwrap_or_default();
        let related = match rel.cardinality {
            Cardinality::ManyToOne => Related::One(members.into_iter().next().map(Box::new)),
            _ => Related::Many(members),
        };
        parent.set_related(name, related)?;
    }
    Ok(())
}

/// Columns of one eager relationship inside a joined row.
#[derive(Debug)]
pub(crate) struct JoinedSegment<'r> {
    pub name: &'r str,
    pub rel: &'r RelationshipDef,
    pub target: &'r EntitySchema,
    pub offset: usize,
}

/// Fold joined rows into de-duplicated parents with their eager members.
///
/// Row layout: the root's columns, then each segment's columns at its
/// offset. Parent order is first appearance; member order follows the rows.
pub(crate) fn assemble_joined(
    root: &EntitySchema,
    segments: &[JoinedSegment<'_>],
    rows: Vec<Vec<Value>>,
) -> Result<Vec<Instance>> {
    let width = root.fields.len();
    let pk_index = root.fields.iter().position(|f| f.primary_key).unwrap_or(0);

    let mut parents: Vec<Instance> = Vec::new();
    let mut by_key: HashMap<Value, usize> = HashMap::new();
    let mut members_seen: HashSet<(usize, usize, Value)> = HashSet::new();

    for row in rows {
        let head = row
            .get(..width)
            .ok_or_else(|| Error::Internal("joined row is narrower than its root".into()))?;
        let key = head[pk_index].clone();
        let idx = match by_key.get(&key) {
            Some(&idx) => idx,
            None => {
                let mut parent = Instance::from_record(root, root.record_from_values(head));
                for segment in segments {
                    parent.set_related(segment.name, Related::empty(segment.rel.cardinality))?;
                }
                parents.push(parent);
                by_key.insert(key, parents.len() - 1);
                parents.len() - 1
            }
        };

        for (s, segment) in segments.iter().enumerate() {
            let end = segment.offset + segment.target.fields.len();
            let values = row.get(segment.offset..end).ok_or_else(|| {
                Error::Internal(format!("joined row is missing columns of {}", segment.name))
            })?;
            let member_pk_index = segment
                .target
                .fields
                .iter()
                .position(|f| f.primary_key)
                .unwrap_or(0);
            let member_key = values[member_pk_index].clone();
            if member_key.is_null() {
                continue;
            }
            if !members_seen.insert((idx, s, member_key)) {
                continue;
            }

            let member = Instance::from_record(segment.target, segment.target.record_from_values(values));
            let parent = &mut parents[idx];
            if segment.rel.is_collection() {
                parent.many_slot_mut(segment.name)?.push(member);
            } else {
                parent.set_related(segment.name, Related::One(Some(Box::new(member))))?;
            }
        }
    }

    Ok(parents)
}
