//! `sdk/client.ts` rendering.

use crate::config::SdkOptions;
use crate::naming::{camel_case, pascal_case};
use crate::normalizer::{Normalized, NormalizedEntity, NormalizedField};
use crate::planner::Plan;
use std::fmt::{self, Write};

pub const HEADER: &str = "// Generated by blueprint. Do not edit.\n";

/// Double-quoted TypeScript string literal.
pub fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// TypeScript type for a field.
pub fn ts_type(field: &NormalizedField) -> String {
    if let Some(values) = &field.enum_values {
        let variants: Vec<String> = values.iter().map(|v| quote(v)).collect();
        return variants.join(" | ");
    }
    match field.ty.as_str() {
        "string" | "time" | "uuid" => "string",
        "int" | "float" => "number",
        "bool" => "boolean",
        _ => "unknown",
    }
    .to_string()
}

pub fn input_type_name(action: &str) -> String {
    format!("{}Input", pascal_case(action))
}

pub fn row_type_name(view: &str) -> String {
    format!("{}Row", pascal_case(view))
}

pub fn render(normalized: &Normalized, plan: &Plan, sdk: &SdkOptions) -> Result<String, fmt::Error> {
    let mut out = String::from(HEADER);

    for entity in normalized.entities.values() {
        writeln!(out)?;
        write_entity(&mut out, entity)?;
    }

    for action in normalized.actions.values() {
        let Some(entity) = normalized.entities.get(&action.input_entity) else {
            continue;
        };
        writeln!(out)?;
        writeln!(out, "export interface {} {{", input_type_name(&action.name))?;
        let creating = action.operation == "create";
        if !creating {
            writeln!(out, "  id: string;")?;
        }
        for field in entity.fields.values().filter(|f| !f.implicit) {
            let optional = !creating || field.nullable || field.default.is_some();
            write_property(&mut out, &field.name, optional, &ts_type(field), field.nullable)?;
        }
        for relation in entity.relations.values() {
            write_property(&mut out, &relation.column, !creating, "string", false)?;
        }
        writeln!(out, "}}")?;
    }

    for view in plan.views.values() {
        writeln!(out)?;
        writeln!(out, "export interface {} {{", row_type_name(&view.name))?;
        writeln!(out, "  id: string;")?;
        for column in view.columns.iter().filter(|c| *c != "id") {
            writeln!(out, "  {column}: any;")?;
        }
        writeln!(out, "}}")?;
    }

    writeln!(out)?;
    writeln!(out, "export const MessageCodes = {{")?;
    for code in normalized.messages.keys() {
        writeln!(out, "  {code}: {},", quote(code))?;
    }
    writeln!(out, "}} as const;")?;
    writeln!(out)?;
    writeln!(out, "export type MessageCode = keyof typeof MessageCodes;")?;

    writeln!(out)?;
    write_client(&mut out, normalized, plan, sdk)?;
    Ok(out)
}

fn write_property(
    out: &mut String,
    name: &str,
    optional: bool,
    ty: &str,
    nullable: bool,
) -> fmt::Result {
    let mark = if optional { "?" } else { "" };
    let null = if nullable { " | null" } else { "" };
    writeln!(out, "  {name}{mark}: {ty}{null};")
}

fn write_entity(out: &mut String, entity: &NormalizedEntity) -> fmt::Result {
    writeln!(out, "export interface {} {{", pascal_case(&entity.name))?;
    for field in entity.fields.values() {
        write_property(out, &field.name, false, &ts_type(field), field.nullable)?;
    }
    for relation in entity.relations.values() {
        let target = pascal_case(&relation.target);
        let ty = if relation.many { format!("{target}[]") } else { target };
        write_property(out, &relation.name, true, &ty, false)?;
        write_property(out, &relation.column, false, "string", false)?;
    }
    writeln!(out, "}}")
}

const CLIENT_PRELUDE: &str = r#"export interface ClientOptions {
  baseUrl: string;
  token?: string;
  fetch?: typeof fetch;
}

export interface ChangeEvent {
  view: string;
  op: "insert" | "update" | "delete";
  id: string;
}

export class ApiError extends Error {
  constructor(
    public readonly status: number,
    public readonly code: MessageCode | undefined,
    message: string,
  ) {
    super(message);
  }
}
"#;

const CLIENT_CORE: &str = r#"  private readonly baseUrl: string;
  private readonly token?: string;
  private readonly fetchImpl: typeof fetch;

  constructor(options: ClientOptions) {
    this.baseUrl = options.baseUrl.replace(/\/$/, "");
    this.token = options.token;
    this.fetchImpl = options.fetch ?? fetch.bind(globalThis);
  }

  private async request<T>(method: string, path: string, body?: unknown): Promise<T> {
    const headers: Record<string, string> = { "Content-Type": "application/json" };
    if (this.token) {
      headers["Authorization"] = `Bearer ${this.token}`;
    }
    const res = await this.fetchImpl(`${this.baseUrl}${API_PREFIX}${path}`, {
      method,
      headers,
      body: body === undefined ? undefined : JSON.stringify(body),
    });
    const payload = await res.json().catch(() => ({}));
    if (!res.ok) {
      throw new ApiError(res.status, payload.code, payload.message ?? res.statusText);
    }
    return payload as T;
  }

  list<T = unknown>(view: string, params?: Record<string, string>): Promise<T[]> {
    const query = params ? `?${new URLSearchParams(params)}` : "";
    return this.request<T[]>("GET", `/views/${encodeURIComponent(view)}${query}`);
  }

  run<T = unknown>(action: string, input: unknown): Promise<T> {
    return this.request<T>("POST", `/actions/${encodeURIComponent(action)}`, input);
  }

  subscribe(view: string, onChange: (event: ChangeEvent) => void): () => void {
    const url = `${this.baseUrl.replace(/^http/, "ws")}${API_PREFIX}/subscribe?view=${encodeURIComponent(view)}`;
    const socket = new WebSocket(url);
    socket.onmessage = (msg) => onChange(JSON.parse(msg.data) as ChangeEvent);
    return () => socket.close();
  }
"#;

fn write_client(
    out: &mut String,
    normalized: &Normalized,
    plan: &Plan,
    sdk: &SdkOptions,
) -> fmt::Result {
    writeln!(out, "const API_PREFIX = {};", quote(&sdk.api_prefix))?;
    writeln!(out)?;
    out.push_str(CLIENT_PRELUDE);
    writeln!(out)?;
    writeln!(out, "export class Client {{")?;
    out.push_str(CLIENT_CORE);

    for action in normalized.actions.values() {
        let Some(entity) = normalized.entities.get(&action.input_entity) else {
            continue;
        };
        let output = pascal_case(&entity.name);
        writeln!(out)?;
        writeln!(
            out,
            "  {}(input: {}): Promise<{output}> {{",
            camel_case(&action.name),
            input_type_name(&action.name)
        )?;
        writeln!(out, "    return this.run<{output}>({}, input);", quote(&action.name))?;
        writeln!(out, "  }}")?;
    }

    for view in plan.views.values() {
        let row = row_type_name(&view.name);
        writeln!(out)?;
        writeln!(
            out,
            "  {}(params?: Record<string, string>): Promise<{row}[]> {{",
            camel_case(&view.name)
        )?;
        writeln!(out, "    return this.list<{row}>({}, params);", quote(&view.name))?;
        writeln!(out, "  }}")?;
    }

    writeln!(out, "}}")
}
