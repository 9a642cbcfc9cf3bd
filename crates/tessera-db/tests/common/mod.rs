#![allow(dead_code)]

use std::sync::LazyLock;

use chrono::NaiveDate;
use tempfile::TempDir;
use tessera_db::{Column, ColumnDef, ColumnType, Db, DbSettings, Entity, Record, SqlEnum};

pub const PREFIX: &str = "t_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Tank,
    Healer,
    Support,
}

impl SqlEnum for Role {
    const VARIANTS: &'static [Self] = &[Role::Tank, Role::Healer, Role::Support];

    fn name(self) -> &'static str {
        match self {
            Role::Tank => "TANK",
            Role::Healer => "HEALER",
            Role::Support => "SUPPORT",
        }
    }
}

pub struct Player(Record);

pub static NAME: LazyLock<Column<Player, String>> =
    LazyLock::new(|| Column::new("name", ColumnType::varchar(16)));
pub static SCORE: LazyLock<Column<Player, i32>> =
    LazyLock::new(|| Column::new("score", ColumnType::integer()).nullable().with_default(0));
pub static ROLE: LazyLock<Column<Player, Role>> = LazyLock::new(|| {
    Column::new("role", ColumnType::enumeration()).with_default(Role::Support)
});
pub static JOINED: LazyLock<Column<Player, NaiveDate>> =
    LazyLock::new(|| Column::new("joined", ColumnType::date()).nullable());

impl Entity for Player {
    const TABLE: &'static str = "players";

    fn columns() -> Vec<ColumnDef> {
        vec![
            NAME.def().clone(),
            SCORE.def().clone(),
            ROLE.def().clone(),
            JOINED.def().clone(),
        ]
    }

    fn from_record(record: Record) -> Self {
        Player(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.0
    }
}

/// Opens a fresh on-disk database. Keep the directory alive for the test.
pub fn open_db() -> (TempDir, Db) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let settings = DbSettings {
        path: dir.path().join("tessera.db").to_string_lossy().into_owned(),
        table_prefix: PREFIX.to_string(),
        ..DbSettings::default()
    };
    let db = Db::open(&settings).expect("failed to open database");
    (dir, db)
}

pub fn player(name: &str, score: i32, role: Role) -> Player {
    let mut player = Player::create();
    player.set(&NAME, name.to_string()).expect("name should fit");
    player.set(&SCORE, score).expect("score should be accepted");
    player.set(&ROLE, role).expect("role should be accepted");
    player
}

/// Saves one player per `(name, score, role)` and returns them.
pub fn seed(db: &Db, rows: &[(&str, i32, Role)]) -> Vec<Player> {
    rows.iter()
        .map(|&(name, score, role)| {
            let mut p = player(name, score, role);
            p.save(db).expect("failed to save player");
            p
        })
        .collect()
}

pub fn names(players: &[Player]) -> Vec<String> {
    players
        .iter()
        .map(|p| p.require(&NAME).expect("name should be set"))
        .collect()
}
