//! Demonstration scenarios.
//!
//! Each scenario seeds its own schema and returns a serialisable report of
//! what the loaders and queries produced.

pub mod eager_loading;
pub mod many_to_many;

use std::fmt;

use relmap_common::{DatabaseConfig, Result};
use relmap_db::models::{accounts, blog};
use relmap_db::pool::{get_conn, init_pool};
use relmap_db::schema::SchemaRegistry;
use relmap_db::Session;
use serde::Serialize;

pub use eager_loading::EagerLoadingReport;
pub use many_to_many::ManyToManyReport;

/// The bundled scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    EagerLoading,
    ManyToMany,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::EagerLoading, Scenario::ManyToMany];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::EagerLoading => "eager-loading",
            Scenario::ManyToMany => "many-to-many",
        }
    }

    pub fn registry(&self) -> Result<SchemaRegistry> {
        match self {
            Scenario::EagerLoading => accounts::registry(),
            Scenario::ManyToMany => blog::registry(),
        }
    }

    /// Run against a fresh pool built from `config`.
    ///
    /// With no database path every run gets its own in-memory database; a
    /// file database must not already hold the scenario's rows.
    pub fn run(&self, config: &DatabaseConfig) -> Result<Report> {
        let registry = self.registry()?;
        let pool = init_pool(config, &registry)?;
        let conn = get_conn(&pool)?;
        let session = Session::new(&conn, &registry).with_echo(config.echo);

        tracing::info!(scenario = self.name(), "running scenario");
        let report = match self {
            Scenario::EagerLoading => Report::EagerLoading(eager_loading::run(&session)?),
            Scenario::ManyToMany => Report::ManyToMany(many_to_many::run(&session)?),
        };
        tracing::info!(scenario = self.name(), "scenario finished");
        Ok(report)
    }
}

/// Report of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    EagerLoading(EagerLoadingReport),
    ManyToMany(ManyToManyReport),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::EagerLoading(report) => fmt::Display::fmt(report, f),
            Report::ManyToMany(report) => fmt::Display::fmt(report, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_runs_in_memory() {
        for scenario in Scenario::ALL {
            let report = scenario.run(&DatabaseConfig::default()).unwrap();
            match (scenario, report) {
                (Scenario::EagerLoading, Report::EagerLoading(_)) => {}
                (Scenario::ManyToMany, Report::ManyToMany(_)) => {}
                (scenario, _) => panic!("{} returned the wrong report", scenario.name()),
            }
        }
    }

    #[test]
    fn echo_does_not_change_results() {
        let config = DatabaseConfig {
            echo: true,
            ..DatabaseConfig::default()
        };
        let quiet = Scenario::ManyToMany.run(&DatabaseConfig::default()).unwrap();
        let loud = Scenario::ManyToMany.run(&config).unwrap();
        assert_eq!(quiet, loud);
    }
}
