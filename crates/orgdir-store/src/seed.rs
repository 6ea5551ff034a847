//! The sample organizational directory.

use serde_json::json;

use orgdir_core::Record;

use crate::client::{Store, StoreError};

const UNITS: &[(&str, &str, &str, Option<&str>)] = &[
    ("msg", "msg systems ag", "HZ", None),
    ("XT", "msg Applied Technology Research (XT)", "RSE", Some("msg")),
    ("XIS", "msg Information Security (XIS)", "MWS", Some("msg")),
];

const PEOPLE: &[(&str, &str, &str, Option<&str>)] = &[
    ("HZ", "Hans Zehetmaier", "msg", None),
    ("JS", "Jens Stäcker", "msg", Some("HZ")),
    ("RSE", "Ralf S. Engelschall", "XT", Some("JS")),
    ("BEN", "Bernd Endras", "XT", Some("RSE")),
    ("CGU", "Carol Gutzeit", "XT", Some("RSE")),
    ("MWS", "Mark-W. Schmidt", "XIS", Some("JS")),
    ("BWE", "Bernhard Weber", "XIS", Some("MWS")),
    ("FST", "Florian Stahl", "XIS", Some("MWS")),
];

/// Load the sample units and persons in one transaction.
pub async fn seed_directory(store: &dyn Store) -> Result<(), StoreError> {
    let mut txn = store.begin().await?;

    for (id, name, _, parent) in UNITS {
        let mut record = Record::new(*id).with_attribute("name", json!(name));
        if let Some(parent) = parent {
            record = record.with_reference("parentUnitId", parent);
        }
        txn.insert("OrgUnit", record).await?;
    }

    for (id, name, unit, supervisor) in PEOPLE {
        let mut record = Record::new(*id)
            .with_attribute("name", json!(name))
            .with_reference("orgUnitId", unit);
        if let Some(supervisor) = supervisor {
            record = record.with_reference("personId", supervisor);
        }
        if let Some((unit_id, ..)) = UNITS.iter().find(|(_, _, director, _)| director == id) {
            record = record.with_reference("directorId", unit_id);
        }
        txn.insert("Person", record).await?;
    }

    txn.commit().await?;
    tracing::info!(
        units = UNITS.len(),
        persons = PEOPLE.len(),
        "Sample directory loaded"
    );
    Ok(())
}
