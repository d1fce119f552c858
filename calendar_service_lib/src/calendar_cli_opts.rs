use anyhow::{Error, format_err};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::{config::Config, pgpool::PgPool, store::CalendarStore};

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CalendarActions {
    /// Create or update the users and events tables
    RunMigrations,
    /// List all users who have logged in
    ListUsers,
    /// List events created for one user
    ListEvents {
        #[arg(short, long)]
        /// Google user id
        google_id: String,
    },
    /// Print a google authorization url
    LoginUrl,
}

#[derive(Parser, Debug)]
pub struct CalendarCliOpts {
    #[command(subcommand)]
    action: Option<CalendarActions>,
}

impl CalendarCliOpts {
    /// # Errors
    /// Returns error if config, database or oauth setup fails
    pub async fn parse_opts() -> Result<(), Error> {
        let opts = Self::parse();
        let action = opts.action.unwrap_or(CalendarActions::ListUsers);

        let config = Config::init_config()?;

        if action == CalendarActions::LoginUrl {
            let state = Uuid::new_v4().simple().to_string();
            println!("{}", config.google_oauth()?.auth_code_url(&state));
            return Ok(());
        }

        let pool = PgPool::new(&config.database_url())?;

        match action {
            CalendarActions::RunMigrations => pool.run_migrations().await?,
            CalendarActions::ListUsers => {
                for user in pool.list_users().await? {
                    println!("{user}");
                }
            }
            CalendarActions::ListEvents { google_id } => {
                let user = pool
                    .get_user_by_google_id(&google_id)
                    .await?
                    .ok_or_else(|| format_err!("No user with google_id {google_id}"))?;
                for event in pool.list_events_for_user(user.id).await? {
                    println!("{event}");
                }
            }
            CalendarActions::LoginUrl => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::calendar_cli_opts::{CalendarActions, CalendarCliOpts};

    #[test]
    fn test_parse_list_events() {
        let opts =
            CalendarCliOpts::try_parse_from(["calendar-service", "list-events", "-g", "abc123"])
                .expect("valid args");
        assert_eq!(
            opts.action,
            Some(CalendarActions::ListEvents {
                google_id: "abc123".to_string()
            })
        );
    }

    #[test]
    fn test_parse_no_action() {
        let opts = CalendarCliOpts::try_parse_from(["calendar-service"]).expect("valid args");
        assert!(opts.action.is_none());
        assert!(CalendarCliOpts::try_parse_from(["calendar-service", "sync"]).is_err());
    }
}
