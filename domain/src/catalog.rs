//! The job board's registered entities.

use std::sync::Arc;

use crate::coerce::{coerce, required_message, Coercion};
use crate::query::Direction::{Asc, Desc};
use crate::schema::{FieldDescriptor, FieldHandler, FieldType, Schema, SchemaError, SchemaRegistry};
use crate::{CoreError, Value};

pub const COMPANIES: &str = "companies";
pub const USERS: &str = "users";
pub const JOBS: &str = "jobs";
pub const APPLICATIONS: &str = "applications";

pub const ROLES: &[&str] = &["candidate", "recruiter", "admin"];
pub const CONTRACT_TYPES: &[&str] = &["CDI", "CDD", "Stage", "Alternance", "Freelance"];
pub const APPLICATION_STATUSES: &[&str] = &["pending", "reviewed", "interview", "accepted", "rejected"];

/// Jobs columns searched by the open-postings listing.
pub const OPEN_JOB_SEARCH: &[&str] = &["title", "location"];

/// Build the registry. `password` turns the users' plaintext password into
/// the stored `password_hash` column.
pub fn job_board(password: Arc<dyn FieldHandler>) -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::new(vec![companies()?, users(password)?, jobs()?, applications()?])
}

fn companies() -> Result<Schema, SchemaError> {
    Schema::builder(COMPANIES, "Entreprises", "companies", "company_id")
        .field(FieldDescriptor::primary_key("company_id", "ID"))
        .field(FieldDescriptor::new("company_name", "Nom de l'entreprise", FieldType::Text).required())
        .field(FieldDescriptor::new("industry", "Secteur", FieldType::Text))
        .field(FieldDescriptor::new("city", "Ville", FieldType::Text))
        .field(FieldDescriptor::new("website", "Site web", FieldType::Url))
        .field(FieldDescriptor::new("contact_email", "Email de contact", FieldType::Email))
        .field(FieldDescriptor::new("description", "Description", FieldType::Textarea).hidden_in_list())
        .default_sort(&[("company_name", Asc), ("company_id", Asc)])
        .searchable(&["company_name", "industry", "city"])
        .build()
}

fn users(password: Arc<dyn FieldHandler>) -> Result<Schema, SchemaError> {
    Schema::builder(USERS, "Utilisateurs", "users", "user_id")
        .field(FieldDescriptor::primary_key("user_id", "ID"))
        .field(FieldDescriptor::new("first_name", "Prénom", FieldType::Text).required())
        .field(FieldDescriptor::new("last_name", "Nom", FieldType::Text).required())
        .field(FieldDescriptor::new("email", "Email", FieldType::Email).required().unique())
        .field(FieldDescriptor::new("phone", "Téléphone", FieldType::Text))
        .field(FieldDescriptor::new("role", "Rôle", FieldType::Select(ROLES)).required())
        .field(FieldDescriptor::new("company_id", "Entreprise", FieldType::Number))
        .field(
            FieldDescriptor::new("password", "Mot de passe", FieldType::Password)
                .required()
                .hidden_in_list()
                .with_handler(password),
        )
        .default_sort(&[("last_name", Asc), ("first_name", Asc), ("user_id", Asc)])
        .searchable(&["first_name", "last_name", "email"])
        .build()
}

fn jobs() -> Result<Schema, SchemaError> {
    Schema::builder(JOBS, "Offres d'emploi", "jobs", "job_id")
        .field(FieldDescriptor::primary_key("job_id", "ID"))
        .field(FieldDescriptor::new("title", "Intitulé du poste", FieldType::Text).required())
        .field(FieldDescriptor::new("company_id", "Entreprise", FieldType::Number).required())
        .field(FieldDescriptor::new("location", "Lieu", FieldType::Text))
        .field(FieldDescriptor::new("contract_type", "Type de contrat", FieldType::Select(CONTRACT_TYPES)))
        .field(FieldDescriptor::new("salary", "Salaire annuel", FieldType::Number))
        .field(FieldDescriptor::new("working_time", "Temps de travail", FieldType::Text))
        .field(FieldDescriptor::new("description", "Description", FieldType::Textarea).hidden_in_list())
        .field(FieldDescriptor::new("is_active", "Active", FieldType::Boolean))
        .field(FieldDescriptor::new("posted_at", "Date de publication", FieldType::Date))
        .default_sort(&[("posted_at", Desc), ("job_id", Desc)])
        .searchable(&["title", "location", "description"])
        .build()
}

fn applications() -> Result<Schema, SchemaError> {
    Schema::builder(APPLICATIONS, "Candidatures", "applications", "application_id")
        .field(FieldDescriptor::primary_key("application_id", "ID"))
        .field(
            FieldDescriptor::new("job_id", "Offre", FieldType::Number)
                .required()
                .fixed_after_create(),
        )
        .field(
            FieldDescriptor::new("user_id", "Candidat", FieldType::Number)
                .required()
                .fixed_after_create(),
        )
        .field(
            FieldDescriptor::new("status", "Statut", FieldType::Select(APPLICATION_STATUSES))
                .required(),
        )
        .field(FieldDescriptor::new("message", "Message de motivation", FieldType::Textarea).hidden_in_list())
        .field(FieldDescriptor::new("applied_at", "Date de candidature", FieldType::Datetime))
        .default_sort(&[("applied_at", Desc), ("application_id", Desc)])
        .searchable(&["status", "message"])
        .build()
}

/// Validate a raw application status against the registered option set.
pub fn application_status(registry: &SchemaRegistry, raw: &str) -> Result<Value, CoreError> {
    let field = registry
        .require(APPLICATIONS)?
        .field("status")
        .ok_or_else(|| CoreError::Internal("applications schema has no status field".into()))?;
    match coerce(field, Some(&serde_json::Value::from(raw))) {
        Ok(Coercion::SetValue(value)) => Ok(value),
        Ok(_) => Err(CoreError::validation(required_message(field))),
        Err(message) => Err(CoreError::validation(message)),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::registry;
    use super::*;

    #[test]
    fn registers_every_entity() {
        let registry = registry();
        let keys: Vec<_> = registry.iter().map(|s| s.key()).collect();
        assert_eq!(keys, vec![COMPANIES, USERS, JOBS, APPLICATIONS]);
    }

    #[test]
    fn every_default_sort_is_total() {
        let registry = registry();
        for schema in registry.iter() {
            assert!(schema.default_sort().contains(schema.primary_key()), "{}", schema.key());
        }
    }

    #[test]
    fn company_name_label() {
        let registry = registry();
        let field = registry.get(COMPANIES).unwrap().field("company_name").unwrap();
        assert_eq!(field.label, "Nom de l'entreprise");
        assert!(field.required);
    }

    #[test]
    fn open_job_search_columns_are_selectable() {
        let registry = registry();
        let jobs = registry.get(JOBS).unwrap();
        for column in OPEN_JOB_SEARCH {
            assert_eq!(jobs.sortable_column(column), Some(*column));
        }
    }

    #[test]
    fn only_user_email_is_unique() {
        let registry = registry();
        let unique: Vec<_> = registry
            .iter()
            .flat_map(|s| s.unique_fields().map(move |f| (s.key(), f.name)))
            .collect();
        assert_eq!(unique, vec![(USERS, "email")]);
    }

    #[test]
    fn status_validation() {
        let registry = registry();
        assert_eq!(application_status(&registry, "interview").unwrap(), Value::from("interview"));
        assert!(matches!(application_status(&registry, "hired"), Err(CoreError::Validation(_))));
        assert!(matches!(application_status(&registry, " "), Err(CoreError::Validation(_))));
    }
}
