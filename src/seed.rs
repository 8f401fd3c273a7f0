//! Demo accounts and sample data. Running the seeder twice leaves the
//! database as the first run left it.

use serde_json::json;
use tracing::info;

use crate::backend::{AdapterExt, Backend, Query, Table};
use crate::db::{create_user, get_user_by_email};
use crate::error::AppError;
use crate::models::{Identity, List, Todo};

pub const SEED_PASSWORD: &str = "password";

struct SeedList {
    title: &'static str,
    description: &'static str,
    color: &'static str,
    is_default: bool,
    todos: &'static [(&'static str, bool)],
}

struct SeedUser {
    email: &'static str,
    display_name: &'static str,
    lists: &'static [SeedList],
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        email: "owner@nself.org",
        display_name: "System Owner",
        lists: &[
            SeedList {
                title: "Getting Started",
                description: "Welcome tasks and initial setup",
                color: "#6366f1",
                is_default: true,
                todos: &[
                    ("Welcome to colist - Explore the demo features!", true),
                    ("Try creating a new list", false),
                    ("Test real-time collaboration", false),
                ],
            },
            SeedList {
                title: "Work Tasks",
                description: "System administration and configuration",
                color: "#8b5cf6",
                is_default: false,
                todos: &[
                    ("Review sharing permissions", false),
                    ("Test realtime subscriptions", false),
                ],
            },
        ],
    },
    SeedUser {
        email: "admin@nself.org",
        display_name: "Administrator",
        lists: &[
            SeedList {
                title: "My Tasks",
                description: "Daily tasks and reminders",
                color: "#ec4899",
                is_default: true,
                todos: &[
                    ("Explore the dashboard", false),
                    ("Customize your profile", false),
                ],
            },
            SeedList {
                title: "Configuration",
                description: "App settings and management",
                color: "#f97316",
                is_default: false,
                todos: &[
                    ("Set up application settings", false),
                    ("Configure user management", false),
                    ("Test the sign-in flow", false),
                ],
            },
        ],
    },
    SeedUser {
        email: "user@nself.org",
        display_name: "Demo User",
        lists: &[
            SeedList {
                title: "Personal",
                description: "Personal goals and daily todos",
                color: "#22c55e",
                is_default: true,
                todos: &[
                    ("Explore the dashboard", false),
                    ("Customize your profile", false),
                    ("Try the offline features", false),
                ],
            },
            SeedList {
                title: "Learning",
                description: "Documentation and tutorials",
                color: "#14b8a6",
                is_default: false,
                todos: &[
                    ("Review the documentation", false),
                    ("Share a list with another user", false),
                    ("Try real-time collaboration", false),
                ],
            },
        ],
    },
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub users: usize,
    pub lists: usize,
    pub todos: usize,
}

/// Creates the demo users with their lists and todos. Existing users and
/// lists (matched by owner and title) are left alone, and todos are only
/// added to lists created by this run.
pub fn run(backend: &Backend) -> Result<SeedReport, AppError> {
    let mut report = SeedReport::default();

    for user in SEED_USERS {
        let profile = match get_user_by_email(backend.db(), user.email)? {
            Some(existing) => existing,
            None => {
                report.users += 1;
                create_user(backend.db(), user.email, SEED_PASSWORD, Some(user.display_name))?
            }
        };
        let client = backend.as_user(Identity {
            id: profile.id.clone(),
            email: profile.email,
        });

        for list in user.lists {
            let existing = client.query(
                Table::Lists,
                &Query::new()
                    .filter("user_id", profile.id.as_str())
                    .filter("title", list.title),
            )?;
            if !existing.is_empty() {
                continue;
            }

            let created: List = client.insert_as(
                Table::Lists,
                json!({
                    "title": list.title,
                    "description": list.description,
                    "color": list.color,
                    "icon": "list",
                    "is_default": list.is_default,
                    "position": client.positions().next(),
                }),
            )?;
            report.lists += 1;

            for (title, completed) in list.todos {
                let _: Todo = client.insert_as(
                    Table::Todos,
                    json!({
                        "list_id": created.id,
                        "title": title,
                        "completed": completed,
                        "position": client.positions().next(),
                    }),
                )?;
                report.todos += 1;
            }
        }
    }

    info!(
        users = report.users,
        lists = report.lists,
        todos = report.todos,
        "Seeded demo data"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::authenticate;

    #[test]
    fn seeding_is_idempotent() {
        let backend = Backend::open_in_memory().unwrap();

        let first = run(&backend).unwrap();
        assert_eq!(first, SeedReport { users: 3, lists: 6, todos: 16 });

        let second = run(&backend).unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[test]
    fn seeded_users_can_log_in_and_own_one_default_list() {
        let backend = Backend::open_in_memory().unwrap();
        run(&backend).unwrap();

        let identity = authenticate(backend.db(), "user@nself.org", SEED_PASSWORD)
            .unwrap()
            .unwrap();
        let lists: Vec<List> = backend
            .as_user(identity)
            .select(Table::Lists, &Query::new().desc("is_default"))
            .unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists.iter().filter(|l| l.is_default).count(), 1);
        assert_eq!(lists[0].title, "Personal");
    }
}
