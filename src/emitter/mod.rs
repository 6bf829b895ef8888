//! Final artifacts: runtime JSON, schema SQL and the TypeScript SDK.

mod artifact;
mod client;
mod react;
mod schema;

pub use artifact::{Artifact, MigrationDocument};
pub use schema::{DROP_TOUCH_FUNCTION, PGCRYPTO, TOUCH_FUNCTION};

use crate::analyzer::Scope;
use crate::ast::Span;
use crate::config::SdkOptions;
use crate::diagnostics::{Code, Diagnostics};
use crate::naming::{camel_case, pascal_case};
use crate::normalizer::Normalized;
use crate::planner::Plan;
use std::collections::HashMap;

/// Members of the generated `Client` class that per-action and per-view
/// methods must not shadow.
const CLIENT_MEMBERS: [&str; 8] = [
    "constructor",
    "request",
    "list",
    "run",
    "subscribe",
    "baseUrl",
    "token",
    "fetchImpl",
];

const GENERIC_HOOKS: [&str; 2] = ["useList", "useAction"];

/// Types the SDK always exports.
const SDK_TYPES: [&str; 6] = [
    "Client",
    "ClientOptions",
    "ChangeEvent",
    "ApiError",
    "MessageCode",
    "MessageCodes",
];

/// Everything one compile writes out.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub artifact: Artifact,
    pub artifact_json: String,
    pub schema_sql: String,
    pub client_ts: String,
    pub react_tsx: String,
}

impl Output {
    /// Files relative to the output directory, in write order.
    pub fn files(&self) -> [(&'static str, &str); 4] {
        [
            ("artifact.json", self.artifact_json.as_str()),
            ("schema.sql", self.schema_sql.as_str()),
            ("sdk/client.ts", self.client_ts.as_str()),
            ("sdk/react.tsx", self.react_tsx.as_str()),
        ]
    }
}

pub fn emit(
    scope: &Scope,
    normalized: &Normalized,
    plan: &Plan,
    sdk: &SdkOptions,
) -> (Output, Diagnostics) {
    let mut diags = Diagnostics::new();

    for entity in scope.entities() {
        if !normalized.entities.contains_key(&entity.name) {
            diags.error(
                Code::PlanInconsistent,
                entity.span,
                format!("entity '{}' was not normalized", entity.name),
            );
        }
    }

    check_sdk_names(scope, normalized, plan, &mut diags);

    let artifact = Artifact::new(normalized, plan);
    let artifact_json = artifact.to_json().unwrap_or_else(|err| {
        diags.error(
            Code::SerializationFailed,
            Span::default(),
            format!("artifact.json: {err}"),
        );
        String::new()
    });
    let schema_sql = schema::render(artifact.migration.as_ref());

    let mut rendered = |name: &str, result: Result<String, std::fmt::Error>| {
        result.unwrap_or_else(|err| {
            diags.error(Code::SerializationFailed, Span::default(), format!("{name}: {err}"));
            String::new()
        })
    };
    let client_ts = rendered("sdk/client.ts", client::render(normalized, plan, sdk));
    let react_tsx = rendered("sdk/react.tsx", react::render(normalized, plan));

    tracing::debug!(
        json_bytes = artifact_json.len(),
        sql_bytes = schema_sql.len(),
        "emission complete"
    );

    (
        Output {
            artifact,
            artifact_json,
            schema_sql,
            client_ts,
            react_tsx,
        },
        diags,
    )
}

/// Reports declarations whose generated TypeScript names would clash with
/// the fixed SDK surface or with each other.
fn check_sdk_names(scope: &Scope, normalized: &Normalized, plan: &Plan, diags: &mut Diagnostics) {
    for entity in normalized.entities.keys() {
        let name = pascal_case(entity);
        if SDK_TYPES.contains(&name.as_str()) {
            let span = scope.entity(entity).map(|e| e.span).unwrap_or_default();
            diags.error(
                Code::ReservedName,
                span,
                format!("entity '{entity}' generates type '{name}', which the SDK already exports"),
            );
        }
    }

    let actions = normalized
        .actions
        .values()
        .filter(|a| normalized.entities.contains_key(&a.input_entity))
        .map(|a| ("action", a.name.as_str(), scope.action(&a.name).map(|d| d.span)));
    let views = plan
        .views
        .keys()
        .map(|v| ("view", v.as_str(), scope.view(v).map(|d| d.span)));

    let mut taken: HashMap<String, String> = HashMap::new();
    for (kind, name, span) in actions.chain(views) {
        let span = span.unwrap_or_default();
        let method = camel_case(name);
        let hook = format!("use{}", pascal_case(name));
        if CLIENT_MEMBERS.contains(&method.as_str()) {
            diags.error(
                Code::ReservedName,
                span,
                format!("{kind} '{name}' generates client method '{method}', which is built in"),
            );
        } else if GENERIC_HOOKS.contains(&hook.as_str()) {
            diags.error(
                Code::ReservedName,
                span,
                format!("{kind} '{name}' generates hook '{hook}', which is built in"),
            );
        } else if let Some(owner) = taken.insert(method.clone(), format!("{kind} '{name}'")) {
            diags.error(
                Code::ReservedName,
                span,
                format!("{kind} '{name}' generates client method '{method}', already used by {owner}"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::config::Config;
    use crate::normalizer::normalize;
    use crate::parser::parse;
    use crate::planner::plan;

    fn run(input: &str) -> (Output, Diagnostics) {
        let file = parse(input).unwrap();
        let config = Config::default();
        let (scope, diags) = analyze(&file, &config.compile);
        assert!(!diags.has_errors(), "{diags:?}");
        let (normalized, _) = normalize(&file, &scope, &config);
        let (plan, _) = plan(&file, &scope, &normalized);
        emit(&scope, &normalized, &plan, &config.sdk)
    }

    #[test]
    fn test_migration_null_without_entities() {
        let (output, diags) = run("app Empty {}");
        assert!(diags.is_empty());
        assert!(output.artifact.migration.is_none());
        assert!(output.schema_sql.is_empty());

        let json: serde_json::Value = serde_json::from_str(&output.artifact_json).unwrap();
        assert!(json["migration"].is_null());
        assert_eq!(json["app_name"], "Empty");
    }

    #[test]
    fn test_preamble_and_postamble() {
        let (output, _) = run("entity User { email: string unique }");
        let migration = output.artifact.migration.as_ref().unwrap();
        assert_eq!(migration.up[0], PGCRYPTO);
        assert_eq!(migration.up[1], TOUCH_FUNCTION);
        assert_eq!(migration.down.last().map(String::as_str), Some(DROP_TOUCH_FUNCTION));
        assert_eq!(migration.up.len(), migration.down.len() + 1);
        assert!(output.schema_sql.starts_with(PGCRYPTO));
        assert!(output.schema_sql.contains("CREATE TABLE IF NOT EXISTS users ("));
    }

    #[test]
    fn test_artifact_shape() {
        let (output, _) = run(r#"
            app Helpdesk { auth: jwt }
            entity User { email: string unique }
            entity Ticket { subject: string length <= 120 }
            relation Ticket.author -> User
            access Ticket { read: user == author }
            action close_ticket { input: Ticket operation: update }
            message TICKET_CLOSED { level: warning }
            view Mine { source: Ticket fields: subject filter: user == author }
            webhook stripe { provider: stripe events: "charge.paid" triggers: close_ticket }
        "#);
        let json: serde_json::Value = serde_json::from_str(&output.artifact_json).unwrap();

        assert_eq!(json["version"], "0001");
        assert_eq!(json["auth"], "jwt");
        assert_eq!(json["database"], "postgres");

        let ticket = &json["entities"]["Ticket"];
        assert_eq!(ticket["table"], "tickets");
        assert_eq!(ticket["fields"]["subject"]["sql_type"], "text");
        assert_eq!(ticket["fields"]["subject"]["max_length"], 120);
        assert!(ticket["fields"]["subject"].get("enum_values").is_none());
        assert_eq!(ticket["fields"]["id"]["type"], "uuid");
        assert_eq!(ticket["relations"]["author"]["column"], "author_id");

        assert_eq!(json["actions"]["close_ticket"]["input_entity"], "Ticket");
        assert_eq!(json["access"]["Ticket"]["read_cel"], "user == author");
        assert_eq!(
            json["views"]["Mine"]["query"],
            "SELECT id, subject FROM tickets WHERE current_setting('app.user_id')::uuid = author_id"
        );
        assert_eq!(json["webhooks"]["stripe"]["route"], "/webhooks/stripe");
        assert_eq!(json["messages"]["TICKET_CLOSED"]["default"], "TICKET_CLOSED");
        assert_eq!(json["migration"]["version"], "0001");
    }

    #[test]
    fn test_generated_names_avoid_sdk_surface() {
        let (_, diags) = run(r#"
            entity Ticket { subject: string }
            action list { input: Ticket }
            action action { input: Ticket operation: update }
            view subscribe { source: Ticket fields: subject }
            view List { source: Ticket fields: subject }
        "#);
        assert_eq!(diags.count(Code::ReservedName), 4);
    }

    #[test]
    fn test_action_and_view_method_clash() {
        let (_, diags) = run(r#"
            entity Ticket { subject: string }
            action open_tickets { input: Ticket }
            view OpenTickets { source: Ticket fields: subject }
        "#);
        assert_eq!(diags.count(Code::ReservedName), 1);
    }

    #[test]
    fn test_entity_named_like_sdk_type() {
        let (_, diags) = run("entity Client { name: string }");
        assert_eq!(diags.count(Code::ReservedName), 1);

        let (_, diags) = run("entity Ticket {} action close_ticket { input: Ticket }");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_output_files() {
        let (output, _) = run("entity User {}");
        let names: Vec<&str> = output.files().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["artifact.json", "schema.sql", "sdk/client.ts", "sdk/react.tsx"]);
        assert!(output.client_ts.contains("export interface User {"));
    }
}
