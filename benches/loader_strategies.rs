//! Benchmark collection loading strategies over 200 users with 5 addresses each.

use criterion::{criterion_group, criterion_main, Criterion};
use relmap_db::models::accounts::{self, Address, User};
use relmap_db::pool::{get_conn, init_memory_pool, DbPool};
use relmap_db::schema::SchemaRegistry;
use relmap_db::{LoadStrategy, Session};

fn setup() -> (SchemaRegistry, DbPool) {
    let registry = accounts::registry().expect("registry");
    let pool = init_memory_pool(&registry).expect("pool");
    {
        let conn = get_conn(&pool).expect("conn");
        let session = Session::new(&conn, &registry);
        session
            .transaction(|s| {
                for u in 0..200 {
                    let name = format!("user{u:03}");
                    let id = s.insert_entity(&mut User::new(&name, &name, &name))?;
                    for a in 0..5 {
                        s.insert_entity(
                            &mut Address::new(&format!("{name}.{a}@example.com")).with_user_id(id),
                        )?;
                    }
                }
                Ok(())
            })
            .unwrap();
    }
    (registry, pool)
}

fn bench_loader_strategies(c: &mut Criterion) {
    let (registry, pool) = setup();
    let conn = get_conn(&pool).unwrap();
    let session = Session::new(&conn, &registry);

    let mut group = c.benchmark_group("load_addresses");

    for strategy in [LoadStrategy::Lazy, LoadStrategy::SelectIn, LoadStrategy::Joined] {
        group.bench_function(strategy.as_str(), |b| {
            b.iter(|| {
                let users = session
                    .query("User")
                    .options("addresses", strategy)
                    .all()
                    .unwrap();
                let total: usize = users
                    .iter()
                    .map(|u| u.collection(&session, "addresses").unwrap().len())
                    .sum();
                assert_eq!(total, 1000);
            });
        });
    }

    group.bench_function("contains_eager", |b| {
        b.iter(|| {
            session
                .query("Address")
                .join("user")
                .contains_eager("user")
                .all()
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_loader_strategies);
criterion_main!(benches);
