//! One-shot provisioning subcommands run against the data directory instead
//! of starting the server.
//!
//! ```text
//! sightline project create <name> <domain> [report-email]
//! sightline project list
//! sightline goal create <project-id> <name> <url|event> <match-value>
//! sightline funnel create <project-id> <name> <type:value>...
//! sightline webhook create <project-id> <url> <secret> <event[,event]>
//! ```

use anyhow::{anyhow, bail, Result};
use serde_json::json;

use sightline_metadata::{
    CreateFunnelStepParams, CreateGoalParams, CreateProjectParams, CreateWebhookParams,
    MetadataStore, WebhookEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    CreateProject {
        name: String,
        domain: String,
        report_email: Option<String>,
    },
    ListProjects,
    CreateGoal {
        project_id: String,
        name: String,
        goal_type: String,
        match_value: String,
    },
    CreateFunnel {
        project_id: String,
        name: String,
        steps: Vec<(String, String)>,
    },
    CreateWebhook {
        project_id: String,
        url: String,
        secret: String,
        events: Vec<WebhookEvent>,
    },
}

impl AdminCommand {
    /// `Ok(None)` when `args` (without the program name) is not an admin
    /// command.
    pub fn parse(args: &[String]) -> Result<Option<Self>> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match words.as_slice() {
            ["project", "create", name, domain] => Self::CreateProject {
                name: name.to_string(),
                domain: domain.to_string(),
                report_email: None,
            },
            ["project", "create", name, domain, email] => Self::CreateProject {
                name: name.to_string(),
                domain: domain.to_string(),
                report_email: Some(email.to_string()),
            },
            ["project", "list"] => Self::ListProjects,
            ["goal", "create", project_id, name, goal_type, match_value] => Self::CreateGoal {
                project_id: project_id.to_string(),
                name: name.to_string(),
                goal_type: goal_type.to_string(),
                match_value: match_value.to_string(),
            },
            ["funnel", "create", project_id, name, steps @ ..] if !steps.is_empty() => {
                let steps = steps
                    .iter()
                    .map(|step| {
                        step.split_once(':')
                            .map(|(t, v)| (t.to_string(), v.to_string()))
                            .ok_or_else(|| anyhow!("funnel step {step:?} must be <type>:<value>"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::CreateFunnel {
                    project_id: project_id.to_string(),
                    name: name.to_string(),
                    steps,
                }
            }
            ["webhook", "create", project_id, url, secret, events] => {
                let events = WebhookEvent::parse_list(events);
                if events.is_empty() {
                    bail!("webhook needs at least one of goal_conversion, traffic_spike");
                }
                Self::CreateWebhook {
                    project_id: project_id.to_string(),
                    url: url.to_string(),
                    secret: secret.to_string(),
                    events,
                }
            }
            [first, ..] if matches!(*first, "project" | "goal" | "funnel" | "webhook") => {
                bail!("unrecognised {first} command; see `sightline help`")
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

/// Execute `command` and return its JSON output.
pub async fn run(store: &dyn MetadataStore, command: AdminCommand) -> Result<String> {
    let output = match command {
        AdminCommand::CreateProject {
            name,
            domain,
            report_email,
        } => {
            let project = store
                .create_project(CreateProjectParams {
                    name,
                    domain,
                    report_email,
                })
                .await?;
            serde_json::to_value(&project)?
        }
        AdminCommand::ListProjects => serde_json::to_value(store.list_projects().await?)?,
        AdminCommand::CreateGoal {
            project_id,
            name,
            goal_type,
            match_value,
        } => {
            let goal = store
                .create_goal(CreateGoalParams {
                    project_id,
                    name,
                    goal_type,
                    match_value,
                })
                .await?;
            serde_json::to_value(&goal)?
        }
        AdminCommand::CreateFunnel {
            project_id,
            name,
            steps,
        } => {
            let steps = steps
                .into_iter()
                .map(|(step_type, match_value)| CreateFunnelStepParams {
                    step_type,
                    match_value,
                    label: None,
                })
                .collect();
            let funnel = store.create_funnel(&project_id, &name, steps).await?;
            serde_json::to_value(&funnel)?
        }
        AdminCommand::CreateWebhook {
            project_id,
            url,
            secret,
            events,
        } => {
            let webhook = store
                .create_webhook(CreateWebhookParams {
                    project_id,
                    url,
                    secret,
                    events,
                })
                .await?;
            json!({
                "id": webhook.id,
                "project_id": webhook.project_id,
                "url": webhook.url,
                "events": webhook.events,
            })
        }
    };
    Ok(serde_json::to_string_pretty(&output)?)
}
