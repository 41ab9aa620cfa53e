//! Accounts scenario: one user with an ordered list of addresses, loaded
//! lazily, with `selectin`, with a LEFT OUTER JOIN, and from a filtering
//! join.

use std::fmt;

use relmap_common::Result;
use relmap_db::models::accounts::{Address, User};
use relmap_db::models::Entity;
use relmap_db::{Instance, Session};
use serde::Serialize;

/// A user together with its loaded addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserWithAddresses {
    pub user: User,
    pub addresses: Vec<Address>,
}

/// An address together with its loaded owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressWithUser {
    pub address: Address,
    pub user: Option<User>,
}

/// Statements issued by each loading style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchCounts {
    pub lazy: usize,
    pub selectin: usize,
    pub joined: usize,
    pub contains_eager: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EagerLoadingReport {
    pub users: Vec<User>,
    /// Addresses of the unsaved user before any were assigned.
    pub transient_addresses: usize,
    /// Owner of Jack's first address, read through `Address.user` before
    /// anything was saved.
    pub back_reference: Option<String>,
    pub lazy: UserWithAddresses,
    pub selectin: UserWithAddresses,
    pub joined: UserWithAddresses,
    pub contains_eager: Vec<AddressWithUser>,
    pub fetches: FetchCounts,
}

fn with_addresses(session: &Session<'_>, user: &Instance) -> Result<UserWithAddresses> {
    Ok(UserWithAddresses {
        user: user.as_entity()?,
        addresses: user
            .collection(session, "addresses")?
            .iter()
            .map(Instance::as_entity)
            .collect::<Result<_>>()?,
    })
}

/// Seed the accounts tables and load Jack's addresses every way.
pub fn run(session: &Session<'_>) -> Result<EagerLoadingReport> {
    session.transaction(|s| {
        for (name, fullname, nickname) in [
            ("Andrzej", "Andrzej Gołota", "Andżej"),
            ("Janusz", "Janusz Tracz", "prywaciarz"),
            ("Mariusz", "Mariusz Pudzianowski", "Pudzian"),
        ] {
            s.insert_entity(&mut User::new(name, fullname, nickname))?;
        }
        Ok(())
    })?;

    let registry = session.registry();
    let mut jack = Instance::from_entity(registry, &User::new("Jack", "Jack Doe", "jc123"))?;
    let transient_addresses = jack.collection(session, "addresses")?.len();
    jack.attach(
        session,
        "addresses",
        Instance::from_entity(registry, &Address::new("jack.doe@gmail.com"))?,
    )?;
    let back_reference = match jack.collection(session, "addresses")?.first() {
        Some(address) => address
            .reference(session, "user")?
            .and_then(|user| user.record().text("name")),
        None => None,
    };

    let jack_id = session.save_graph(&mut jack)?;
    tracing::info!(id = jack_id, "saved Jack with one address");

    // Owner set by raw id, without touching Jack's collection
    let mut loose = Address::new("j25@yahoo.com").with_user_id(4);
    session.transaction(|s| s.insert_entity(&mut loose))?;

    let mut fetches = FetchCounts::default();

    session.reset_fetch_count();
    let lazy_jack = session.query(User::ENTITY).filter_by("name", "Jack").one()?;
    let lazy = with_addresses(session, &lazy_jack)?;
    fetches.lazy = session.fetch_count();

    session.reset_fetch_count();
    let selectin_jack = session
        .query(User::ENTITY)
        .selectin("addresses")
        .filter_by("name", "Jack")
        .one()?;
    let selectin = with_addresses(session, &selectin_jack)?;
    fetches.selectin = session.fetch_count();

    session.reset_fetch_count();
    let joined_jack = session
        .query(User::ENTITY)
        .joined("addresses")
        .filter_by("name", "Jack")
        .one()?;
    let joined = with_addresses(session, &joined_jack)?;
    fetches.joined = session.fetch_count();

    session.reset_fetch_count();
    let contains_eager = session
        .query(Address::ENTITY)
        .filter_related("user", "name", "Jack")
        .contains_eager("user")
        .all()?
        .iter()
        .map(|address| {
            Ok(AddressWithUser {
                address: address.as_entity()?,
                user: address
                    .reference(session, "user")?
                    .map(Instance::as_entity)
                    .transpose()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    fetches.contains_eager = session.fetch_count();

    let users = session
        .query(User::ENTITY)
        .all()?
        .iter()
        .map(Instance::as_entity)
        .collect::<Result<_>>()?;

    Ok(EagerLoadingReport {
        users,
        transient_addresses,
        back_reference,
        lazy,
        selectin,
        joined,
        contains_eager,
        fetches,
    })
}

fn write_user(f: &mut fmt::Formatter<'_>, user: &User) -> fmt::Result {
    write!(
        f,
        "User(id: {}, name: {}, fullname: {}, nickname: {})",
        user.id.unwrap_or_default(),
        user.name.as_deref().unwrap_or("-"),
        user.fullname.as_deref().unwrap_or("-"),
        user.nickname.as_deref().unwrap_or("-")
    )
}

fn write_loaded(f: &mut fmt::Formatter<'_>, label: &str, loaded: &UserWithAddresses, fetches: usize) -> fmt::Result {
    writeln!(f, "{label} ({fetches} fetches)")?;
    write!(f, "  ")?;
    write_user(f, &loaded.user)?;
    writeln!(f)?;
    for address in &loaded.addresses {
        writeln!(f, "    Address(email_address={})", address.email_address)?;
    }
    Ok(())
}

impl fmt::Display for EagerLoadingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "USERS")?;
        for user in &self.users {
            write!(f, "  ")?;
            write_user(f, user)?;
            writeln!(f)?;
        }
        writeln!(f, "Unsaved Jack has {} addresses", self.transient_addresses)?;
        writeln!(
            f,
            "First address belongs to {}",
            self.back_reference.as_deref().unwrap_or("nobody")
        )?;
        write_loaded(f, "LAZY LOAD", &self.lazy, self.fetches.lazy)?;
        write_loaded(f, "SELECTIN LOAD", &self.selectin, self.fetches.selectin)?;
        write_loaded(f, "JOINED LOAD", &self.joined, self.fetches.joined)?;
        writeln!(f, "JOIN + CONTAINS EAGER ({} fetches)", self.fetches.contains_eager)?;
        for entry in &self.contains_eager {
            write!(f, "  Address(email_address={}) -> ", entry.address.email_address)?;
            match entry.user {
                Some(ref user) => write_user(f, user)?,
                None => write!(f, "None")?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_db::models::accounts;
    use relmap_db::pool::{get_conn, init_memory_pool};

    #[test]
    fn run_loads_jack_every_way() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let report = run(&session).unwrap();
        assert_eq!(report.users.len(), 4);
        assert_eq!(report.users[3].id, Some(4));
        assert_eq!(report.transient_addresses, 0);
        assert_eq!(report.back_reference.as_deref(), Some("Jack"));

        let emails: Vec<&str> = report
            .selectin
            .addresses
            .iter()
            .map(|a| a.email_address.as_str())
            .collect();
        assert_eq!(emails, vec!["jack.doe@gmail.com", "j25@yahoo.com"]);
        assert_eq!(report.lazy, report.selectin);
        assert_eq!(report.joined, report.selectin);
        assert_eq!(report.contains_eager.len(), 2);

        assert_eq!(
            report.fetches,
            FetchCounts {
                lazy: 2,
                selectin: 2,
                joined: 1,
                contains_eager: 1,
            }
        );
    }

    #[test]
    fn report_renders_sections() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let text = run(&session).unwrap().to_string();
        assert!(text.contains("SELECTIN LOAD (2 fetches)"));
        assert!(text.contains("Address(email_address=j25@yahoo.com)"));
        assert!(text.contains("User(id: 4, name: Jack"));
    }
}
