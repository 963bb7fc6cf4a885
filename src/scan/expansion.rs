//! Builds the task list for an expansion run.

use super::models::{NewScanTask, TaskPriority, TaskType};
use serde::Deserialize;
use std::collections::HashSet;

/// Locations searched for the top roles beyond the user's own locations.
pub const EXPANSION_LOCATIONS: &[&str] = &[
    "Remote",
    "New York",
    "San Francisco",
    "Austin",
    "Seattle",
    "Boston",
    "Chicago",
    "Toronto",
    "London",
    "Berlin",
    "Amsterdam",
];

/// How many of the profile's roles are searched in the expansion locations.
const TOP_ROLES: usize = 2;

/// Search criteria for an expansion run, with what the synchronous first
/// pass already covered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpansionRequest {
    pub roles: Vec<String>,
    pub searched_roles: Vec<String>,
    pub user_locations: Vec<String>,
    pub searched_locations: Vec<String>,
    pub industries: Vec<String>,
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn cleaned(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect()
}

/// Plan the tasks of an expansion run, highest priority first, capped at
/// `max_tasks`.
///
/// - each role in each user location not already covered by the first pass
///   (searched role and searched location), at user-criteria priority
/// - the top two roles in every expansion location that is neither a user
///   location nor already searched
/// - each industry in each user location
pub fn plan_tasks(request: &ExpansionRequest, max_tasks: usize) -> Vec<NewScanTask> {
    let roles = cleaned(&request.roles);
    let user_locations = cleaned(&request.user_locations);
    let industries = cleaned(&request.industries);
    let searched_roles: HashSet<String> =
        request.searched_roles.iter().map(|r| normalize(r)).collect();
    let searched_locations: HashSet<String> = request
        .searched_locations
        .iter()
        .map(|l| normalize(l))
        .collect();

    let mut tasks = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut push = |task: NewScanTask| {
        if seen.insert((normalize(&task.keywords), normalize(&task.location))) {
            tasks.push(task);
        }
    };

    for role in &roles {
        for location in &user_locations {
            let covered = searched_roles.contains(&normalize(role))
                && searched_locations.contains(&normalize(location));
            if !covered {
                push(NewScanTask::new(
                    TaskType::RoleVariation,
                    *role,
                    *location,
                    TaskPriority::UserCriteria,
                ));
            }
        }
    }

    let user_location_keys: HashSet<String> =
        user_locations.iter().map(|l| normalize(l)).collect();
    for role in roles.iter().take(TOP_ROLES) {
        for location in EXPANSION_LOCATIONS {
            let key = normalize(location);
            if user_location_keys.contains(&key) || searched_locations.contains(&key) {
                continue;
            }
            push(NewScanTask::new(
                TaskType::ExpandedLocation,
                *role,
                *location,
                TaskPriority::Expansion,
            ));
        }
    }

    for industry in &industries {
        for location in &user_locations {
            push(NewScanTask::new(
                TaskType::IndustrySearch,
                *industry,
                *location,
                TaskPriority::Expansion,
            ));
        }
    }

    tasks.truncate(max_tasks);
    tasks
}
