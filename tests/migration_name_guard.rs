use std::collections::{HashMap, HashSet};
use std::path::Path;

use sea_orm_migration::MigratorTrait;

/// Guard test for migration names:
/// 1. Names are unique
/// 2. Names follow mYYYYMMDD_HHMMSS_description
///    - Date segment: 8 digits, time segment: 6 digits
///    - Description: lowercase alphanumeric and underscores
/// 3. A folder-based migration reports exactly its folder name
#[test]
fn migration_names_are_unique_and_well_formed() {
    use probe_scheduler::database::migrations::Migrator;

    let migrations = Migrator::migrations();

    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates: HashMap<String, usize> = HashMap::new();
    let mut invalid: Vec<String> = Vec::new();

    for mig in migrations.iter() {
        let name = mig.name().to_string();

        if !is_valid_migration_name(&name) {
            invalid.push(name.clone());
        }

        if !seen.insert(name.clone()) {
            *duplicates.entry(name).or_insert(1) += 1;
        }
    }

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src")
        .join("database")
        .join("migrations");
    let mut folder_mismatches: Vec<String> = Vec::new();

    if let Ok(read_dir) = std::fs::read_dir(&migrations_dir) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(folder_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            // Only migration-style folders: 'm' + date + '_' + time + '_'
            if folder_name.starts_with('m')
                && folder_name.len() > 17
                && folder_name.chars().nth(16) == Some('_')
                && !seen.contains(folder_name)
            {
                folder_mismatches.push(folder_name.to_string());
            }
        }
    }

    if !duplicates.is_empty() || !invalid.is_empty() || !folder_mismatches.is_empty() {
        let mut msg = String::from("Migration naming guard failed:\n");

        if !duplicates.is_empty() {
            msg.push_str("  Duplicate names detected:\n");
            for (name, count) in duplicates {
                msg.push_str(&format!("    * {} (occurrences: {})\n", name, count + 1));
            }
        }

        if !invalid.is_empty() {
            msg.push_str("  Invalid naming format (expected mYYYYMMDD_HHMMSS_description):\n");
            for name in invalid {
                msg.push_str(&format!("    * {}\n", name));
            }
        }

        if !folder_mismatches.is_empty() {
            msg.push_str("  Folder/name mismatches (directory names not reported by Migrator):\n");
            for f in folder_mismatches {
                msg.push_str(&format!("    * {}\n", f));
            }
        }

        panic!("{msg}");
    }
}

#[test]
fn migrations_are_listed_in_timestamp_order() {
    use probe_scheduler::database::migrations::Migrator;

    let names: Vec<String> = Migrator::migrations()
        .iter()
        .map(|mig| mig.name().to_string())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

fn is_valid_migration_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('m') else {
        return false;
    };
    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() < 3 {
        return false;
    }

    let date = parts[0];
    let time = parts[1];
    let desc = parts[2..].join("_");

    date.len() == 8
        && date.chars().all(|c| c.is_ascii_digit())
        && time.len() == 6
        && time.chars().all(|c| c.is_ascii_digit())
        && !desc.is_empty()
        && desc
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
