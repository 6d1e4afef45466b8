//! Primitive kinds reached through relations are checked against the backend
//!
//! Kept in its own binary: once a type map with an `Int8` column is cached,
//! every strict MSSQL open in the same process is refused.

mod common;

use common::recording_with;
use rust_orm_system::prelude::*;

#[derive(Debug, Default, Clone)]
struct Sample {
    id: i32,
    station_id: i32,
    level: i8,
}

#[derive(Debug, Default, Clone)]
struct Station {
    id: i32,
    name: String,
    samples: Vec<Sample>,
}

impl Entity for Sample {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("samples")
            .identity("id", PrimitiveKind::Int32, |s: &Sample| &s.id, |s: &mut Sample| &mut s.id)
            .column("station_id", PrimitiveKind::Int32, |s: &Sample| &s.station_id, |s: &mut Sample| &mut s.station_id)
            .column("level", PrimitiveKind::Int8, |s: &Sample| &s.level, |s: &mut Sample| &mut s.level)
    }
}

impl Entity for Station {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("stations")
            .identity("id", PrimitiveKind::Int32, |s: &Station| &s.id, |s: &mut Station| &mut s.id)
            .column("name", PrimitiveKind::Varchar, |s: &Station| &s.name, |s: &mut Station| &mut s.name)
            .one_to_many(
                "samples",
                ForeignKey::single("id", "station_id"),
                |s: &Station| &s.samples,
                |s: &mut Station| &mut s.samples,
            )
    }
}

fn station() -> Station {
    Station {
        name: "north".into(),
        samples: vec![Sample {
            level: 4,
            ..Sample::default()
        }],
        ..Station::default()
    }
}

#[tokio::test]
async fn test_related_kind_unsupported_by_backend() -> Result<()> {
    // opened before either map is cached, so the open itself succeeds
    let (strict, driver) = recording_with(DataBaseConfig::new(DatabaseType::Mssql, "recording")).await?;

    let mut rejected = station();
    let err = strict.save(&mut rejected).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Configuration(_)));
    assert!(err.to_string().contains("samples"));
    assert!(driver.sql().is_empty());
    assert!(strict.load_by_key::<Station>(1).await.is_err());

    let config = DataBaseConfig::new(DatabaseType::Mssql, "recording").with_allow_invalid_primitives(true);
    let (lenient, driver) = recording_with(config).await?;
    let mut accepted = station();
    assert!(lenient.save(&mut accepted).await?.is_success());
    assert!(driver.sql().iter().any(|sql| sql.starts_with("MERGE INTO samples")));
    Ok(())
}
