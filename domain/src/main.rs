use std::env;
use std::process;
use std::sync::Arc;

use domain::adapters::memory_store::InMemoryStore;
use domain::adapters::mock_repo::MockRepository;
use domain::catalog;
use domain::handlers::{PasswordHashField, PasswordHasher};
use domain::{CoreError, CrudRepository, PageRequest};
use serde_json::json;

/// The demo only reads, so there is nothing to hash.
struct NoHashing;
impl PasswordHasher for NoHashing {
    fn hash(&self, _plain: &str) -> Result<String, CoreError> {
        Err(CoreError::Internal("password hashing is not available in the demo".into()))
    }
}

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain list <entity> [--q <text>] [--sort <col:dir,...>] [--page <n>] [--limit <n>]\n  domain get <entity> <id>\n\nEntities: companies, users, jobs, applications\n\nNotes:\n  - This demo CLI reads the seeded in-memory dataset; nothing is persisted.",
        domain::about()
    );
}

fn parse_number(flag: &str, value: &str) -> Result<i64, String> {
    value
        .parse()
        .map_err(|_| format!("{} expects a number, got {:?}", flag, value))
}

async fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    let password = Arc::new(PasswordHashField::new(NoHashing, "password_hash"));
    let registry = catalog::job_board(password).map_err(|e| format!("invalid schema: {}", e))?;
    let repo = MockRepository::new(Arc::new(registry), Arc::new(InMemoryStore::job_board()));

    match cmd.as_str() {
        "list" => {
            let Some(entity) = args.next() else {
                return Err("missing <entity> for list".into());
            };

            let mut page = None;
            let mut limit = None;
            let mut search = None;
            let mut sort = None;
            let rest: Vec<String> = args.collect();
            let mut i = 0;
            while i < rest.len() {
                let flag = rest[i].as_str();
                let Some(value) = rest.get(i + 1) else {
                    return Err(format!("{} requires a value", flag));
                };
                match flag {
                    "--q" => search = Some(value.clone()),
                    "--sort" => sort = Some(value.clone()),
                    "--page" => page = Some(parse_number(flag, value)?),
                    "--limit" => limit = Some(parse_number(flag, value)?),
                    unk => return Err(format!("unknown argument: {}", unk)),
                }
                i += 2;
            }

            let mut request = PageRequest::new(page, limit);
            request.search = search;
            request.sort = sort;
            let result = repo
                .list(&entity, &request)
                .await
                .map_err(|e| format!("list failed: {}", e))?;
            let body = json!({
                "page": request.page,
                "limit": request.limit,
                "total": result.total,
                "rows": result.items,
                "sort": result.sort.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?);
            Ok(())
        }
        "get" => {
            let (Some(entity), Some(id)) = (args.next(), args.next()) else {
                return Err("usage: domain get <entity> <id>".into());
            };
            let id = parse_number("<id>", &id)?;
            match repo.find_by_id(&entity, id).await {
                Ok(Some(row)) => {
                    let body = json!({ "row": row });
                    println!("{}", serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?);
                    Ok(())
                }
                Ok(None) => Err("not found".into()),
                Err(e) => Err(format!("get failed: {}", e)),
            }
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(msg) = run().await {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
