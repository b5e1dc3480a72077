//! Baseline job board dataset loaded into the in-memory store.

use super::memory_store::SeedCollection;
use crate::catalog::{APPLICATIONS, COMPANIES, JOBS, USERS};
use crate::{Record, Value};

/// Placeholder hash that no password verifies against.
pub const DISABLED_PASSWORD_HASH: &str = "seed$disabled";

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn date(s: &str) -> Value {
    Value::Date(s.to_string())
}

fn opt_text(s: Option<&str>) -> Value {
    s.map(text).unwrap_or(Value::Null)
}

fn row<const N: usize>(pairs: [(&str, Value); N]) -> Record {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn job_board() -> Vec<SeedCollection> {
    vec![
        SeedCollection {
            table: COMPANIES,
            primary_key: "company_id",
            rows: companies(),
        },
        SeedCollection {
            table: USERS,
            primary_key: "user_id",
            rows: users(),
        },
        SeedCollection {
            table: JOBS,
            primary_key: "job_id",
            rows: jobs(),
        },
        SeedCollection {
            table: APPLICATIONS,
            primary_key: "application_id",
            rows: applications(),
        },
    ]
}

fn companies() -> Vec<Record> {
    [
        (1, "TechNova", "Logiciel", "Paris", Some("https://technova.example"), "Éditeur de logiciels B2B."),
        (2, "GreenPulse", "Énergies renouvelables", "Lyon", None, "Installations solaires et éoliennes."),
        (3, "Maison Béranger", "Agroalimentaire", "Bordeaux", None, "Conserverie familiale depuis 1962."),
    ]
    .into_iter()
    .map(|(id, name, industry, city, website, description)| {
        row([
            ("company_id", Value::Int(id)),
            ("company_name", text(name)),
            ("industry", text(industry)),
            ("city", text(city)),
            ("website", opt_text(website)),
            ("contact_email", Value::Null),
            ("description", text(description)),
        ])
    })
    .collect()
}

fn users() -> Vec<Record> {
    [
        (1, "Alice", "Martin", "alice.martin@technova.example", "recruiter", Some(1)),
        (2, "Bruno", "Petit", "bruno.petit@greenpulse.example", "recruiter", Some(2)),
        (3, "Chloé", "Durand", "chloe.durand@mail.example", "candidate", None),
        (4, "David", "Leroy", "david.leroy@mail.example", "candidate", None),
    ]
    .into_iter()
    .map(|(id, first, last, email, role, company)| {
        row([
            ("user_id", Value::Int(id)),
            ("first_name", text(first)),
            ("last_name", text(last)),
            ("email", text(email)),
            ("phone", Value::Null),
            ("role", text(role)),
            ("company_id", company.map(Value::Int).unwrap_or(Value::Null)),
            ("password_hash", text(DISABLED_PASSWORD_HASH)),
        ])
    })
    .collect()
}

fn jobs() -> Vec<Record> {
    [
        (1, "Développeur Rust backend", 1, Some("Paris"), "CDI", 55000, true, "2024-03-01"),
        (2, "Ingénieur DevOps", 1, None, "CDI", 52000, true, "2024-03-05"),
        (3, "Chargé de projets solaires", 2, Some("Lyon"), "CDD", 38000, true, "2024-02-20"),
        (4, "Stagiaire data analyst", 2, None, "Stage", 12000, false, "2024-01-15"),
        (5, "Responsable qualité", 3, Some("Bordeaux"), "CDI", 45000, true, "2024-03-10"),
        (6, "Alternant marketing digital", 3, None, "Alternance", 15000, true, "2024-03-05"),
    ]
    .into_iter()
    .map(|(id, title, company, location, contract, salary, active, posted)| {
        row([
            ("job_id", Value::Int(id)),
            ("title", text(title)),
            ("company_id", Value::Int(company)),
            ("location", opt_text(location)),
            ("contract_type", text(contract)),
            ("salary", Value::Int(salary)),
            ("working_time", text("Temps plein")),
            ("description", Value::Null),
            ("is_active", Value::Int(i64::from(active))),
            ("posted_at", date(posted)),
        ])
    })
    .collect()
}

fn applications() -> Vec<Record> {
    [
        (1, 1, 3, "pending", "2024-03-02T09:15:00"),
        (2, 3, 3, "interview", "2024-02-22T14:00:00"),
        (3, 2, 4, "reviewed", "2024-03-06T10:30:00"),
        (4, 5, 4, "accepted", "2024-03-11T08:00:00"),
    ]
    .into_iter()
    .map(|(id, job, user, status, applied)| {
        row([
            ("application_id", Value::Int(id)),
            ("job_id", Value::Int(job)),
            ("user_id", Value::Int(user)),
            ("status", text(status)),
            ("message", Value::Null),
            ("applied_at", date(applied)),
        ])
    })
    .collect()
}
