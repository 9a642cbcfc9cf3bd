mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{names, open_db, player, Player, Role, NAME};
use tessera_db::{Entity, Order, Select};

const THREADS: usize = 8;

#[test]
fn concurrent_first_use_creates_the_table_once() {
    let (_dir, db) = open_db();
    let db = Arc::new(db);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut p = player(&format!("p{i:02}"), i as i32, Role::Tank);
                p.save(&db).expect("failed to save from thread");
                p.id().expect("stored")
            })
        })
        .collect();

    let mut ids: Vec<i64> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), THREADS, "every insert gets its own id");
    assert_eq!(db.stats().tables_created, 1);
    assert_eq!(db.count::<Player>(None).expect("count failed"), THREADS as u64);
}

#[test]
fn threads_share_one_connection_for_reads_and_writes() {
    let (_dir, db) = open_db();
    let db = Arc::new(db);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for n in 0..10 {
                    let mut p = player(&format!("w{w}n{n}"), n, Role::Healer);
                    p.save(&db).expect("failed to save");
                    let _ = db
                        .get_all::<Player>(&Select::matching(NAME.eq(format!("w{w}n{n}"))))
                        .expect("failed to read back");
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().expect("writer panicked");
    }

    assert_eq!(db.count::<Player>(None).expect("count failed"), 40);
    let first: Vec<Player> = db
        .get_all(&Select::all().order(Order::new().asc(&*NAME)).limit(2))
        .expect("query failed");
    assert_eq!(names(&first), vec!["w0n0", "w0n1"]);
}

#[test]
fn forced_reconnect_keeps_working() {
    let (_dir, db) = open_db();
    let mut p = player("zoe", 9, Role::Support);
    p.save(&db).expect("failed to insert");

    db.connections().reconnect().expect("reconnect failed");
    assert_eq!(db.stats().reconnects, 1);

    let loaded: Player = db
        .get_by_id(p.id().expect("stored"))
        .expect("query after reconnect failed")
        .expect("row should exist");
    assert_eq!(loaded.require(&NAME).expect("name"), "zoe");
    assert_eq!(db.stats().tables_created, 1, "schema cache survives reconnects");
}
