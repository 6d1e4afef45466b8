//! Basic ORM usage example
//!
//! This example demonstrates:
//! - Declaring entities with one-to-many and many-to-many relations
//! - Saving an object graph in one transaction
//! - Loading it back by key and by conditions
//! - Observing every statement sent
//!
//! Run with: cargo run --example basic_usage

use rust_orm_system::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct Track {
    id: i64,
    album_id: i64,
    title: String,
}

#[derive(Debug, Default, Clone)]
struct Genre {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Clone)]
struct Album {
    id: i64,
    title: String,
    price: Decimal,
    tracks: Vec<Track>,
    genres: Vec<Genre>,
}

impl Entity for Track {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("tracks")
            .identity("id", PrimitiveKind::Int64, |t: &Track| &t.id, |t: &mut Track| &mut t.id)
            .column("album_id", PrimitiveKind::Int64, |t: &Track| &t.album_id, |t: &mut Track| &mut t.album_id)
            .column("title", PrimitiveKind::Varchar, |t: &Track| &t.title, |t: &mut Track| &mut t.title)
    }
}

impl Entity for Genre {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("genres")
            .identity("id", PrimitiveKind::Int64, |g: &Genre| &g.id, |g: &mut Genre| &mut g.id)
            .column("name", PrimitiveKind::Varchar, |g: &Genre| &g.name, |g: &mut Genre| &mut g.name)
    }
}

impl Entity for Album {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("albums")
            .identity("id", PrimitiveKind::Int64, |a: &Album| &a.id, |a: &mut Album| &mut a.id)
            .column("title", PrimitiveKind::Varchar, |a: &Album| &a.title, |a: &mut Album| &mut a.title)
            .column("price", PrimitiveKind::Decimal, |a: &Album| &a.price, |a: &mut Album| &mut a.price)
            .one_to_many(
                "tracks",
                ForeignKey::single("id", "album_id"),
                |a: &Album| &a.tracks,
                |a: &mut Album| &mut a.tracks,
            )
            .many_to_many(
                "genres",
                "album_genres",
                ForeignKey::single("id", "album_id"),
                ForeignKey::single("genre_id", "id"),
                |a: &Album| &a.genres,
                |a: &mut Album| &mut a.genres,
            )
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE albums (id INTEGER PRIMARY KEY, title TEXT, price TEXT)",
    "CREATE TABLE tracks (id INTEGER PRIMARY KEY, album_id INTEGER, title TEXT)",
    "CREATE TABLE genres (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE album_genres (album_id INTEGER, genre_id INTEGER, PRIMARY KEY (album_id, genre_id))",
];

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Rust ORM System - Basic Usage Example ===\n");

    // Every operation opens its own connection, so the database lives in a file
    let dir = tempfile::tempdir().map_err(|e| DatabaseError::other(e.to_string()))?;
    let path = dir.path().join("music.db").to_string_lossy().into_owned();

    println!("1. Creating tables...");
    let setup = SqliteDatabase::new();
    setup.connect(&path).await?;
    for sql in SCHEMA {
        setup.execute(sql).await?;
    }
    setup.disconnect().await?;
    println!("   ✓ {} tables created\n", SCHEMA.len());

    println!("2. Opening the database...");
    let db = DataBase::open(DataBaseConfig::new(DatabaseType::Sqlite, path)).await?;
    let statements = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&statements);
    db.on_command_executed(move |statement| {
        counter.fetch_add(1, Ordering::Relaxed);
        println!("   > {}", statement.text);
    });
    println!("   ✓ Opened ({})\n", db.backend());

    println!("3. Saving an album with its tracks and genres...");
    let mut album = Album {
        title: "Blue Train".into(),
        price: Decimal::new("12.99")?,
        tracks: vec![
            Track {
                title: "Blue Train".into(),
                ..Track::default()
            },
            Track {
                title: "Moment's Notice".into(),
                ..Track::default()
            },
        ],
        genres: vec![Genre {
            name: "hard bop".into(),
            ..Genre::default()
        }],
        ..Album::default()
    };
    let status = db.save(&mut album).await?;
    println!("   ✓ {} (album id {})\n", status, album.id);

    println!("4. Loading it back by key...");
    match db.load_by_key::<Album>(album.id).await? {
        DbStatus::Success(loaded) => {
            println!("   ✓ {} at {}", loaded.title, loaded.price);
            for track in &loaded.tracks {
                println!("     - track #{}: {}", track.id, track.title);
            }
            for genre in &loaded.genres {
                println!("     - genre: {}", genre.name);
            }
        }
        other => println!("   ✗ {}", other),
    }
    println!();

    println!("5. Loading by conditions...");
    let status = db.load_by_conditions::<Track, _, _>(&[("title", "Giant Steps")]).await?;
    println!("   ✓ code {}: {}\n", status.code(), status);

    println!("6. Deleting one track...");
    let status = db.delete(&album.tracks[0]).await?;
    let remaining = db.execute_scalar("SELECT COUNT(*) FROM tracks").await?;
    println!("   ✓ {} ({:?} tracks left)\n", status, remaining);

    println!("=== {} statements sent ===", statements.load(Ordering::Relaxed));
    Ok(())
}
