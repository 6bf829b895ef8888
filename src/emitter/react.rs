//! `sdk/react.tsx` rendering.

use super::client::{HEADER, input_type_name, quote, row_type_name};
use crate::naming::pascal_case;
use crate::normalizer::Normalized;
use crate::planner::Plan;
use std::fmt::{self, Write};

const GENERIC_HOOKS: &str = r#"export function useList<T = unknown>(client: Client, view: string, params?: Record<string, string>) {
  const [data, setData] = useState<T[]>([]);
  const [loading, setLoading] = useState(true);
  const [error, setError] = useState<Error | null>(null);
  const key = params ? JSON.stringify(params) : "";

  const refetch = useCallback(async () => {
    setLoading(true);
    try {
      setData(await client.list<T>(view, params));
      setError(null);
    } catch (e) {
      setError(e as Error);
    } finally {
      setLoading(false);
    }
    // eslint-disable-next-line react-hooks/exhaustive-deps
  }, [client, view, key]);

  useEffect(() => {
    void refetch();
    return client.subscribe(view, () => void refetch());
  }, [client, view, refetch]);

  return { data, loading, error, refetch };
}

export function useAction<I = unknown, O = unknown>(client: Client, action: string) {
  const [loading, setLoading] = useState(false);
  const [error, setError] = useState<Error | null>(null);

  const execute = useCallback(
    async (input: I): Promise<O | undefined> => {
      setLoading(true);
      setError(null);
      try {
        return await client.run<O>(action, input);
      } catch (e) {
        setError(e as Error);
        return undefined;
      } finally {
        setLoading(false);
      }
    },
    [client, action],
  );

  return { execute, loading, error };
}
"#;

pub fn render(normalized: &Normalized, plan: &Plan) -> Result<String, fmt::Error> {
    let mut out = String::from(HEADER);

    let mut imports = vec!["Client".to_string()];
    for entity in normalized.entities.keys() {
        imports.push(pascal_case(entity));
    }
    let actions: Vec<_> = normalized
        .actions
        .values()
        .filter(|a| normalized.entities.contains_key(&a.input_entity))
        .collect();
    imports.extend(actions.iter().map(|a| input_type_name(&a.name)));
    imports.extend(plan.views.keys().map(|v| row_type_name(v)));

    writeln!(out, "import {{ useCallback, useEffect, useState }} from \"react\";")?;
    writeln!(out, "import type {{ {} }} from \"./client\";", imports.join(", "))?;
    writeln!(out)?;
    out.push_str(GENERIC_HOOKS);

    for view in plan.views.values() {
        let row = row_type_name(&view.name);
        writeln!(out)?;
        writeln!(
            out,
            "export function use{}(client: Client, params?: Record<string, string>) {{",
            pascal_case(&view.name)
        )?;
        writeln!(out, "  return useList<{row}>(client, {}, params);", quote(&view.name))?;
        writeln!(out, "}}")?;
    }

    for action in actions {
        writeln!(out)?;
        writeln!(
            out,
            "export function use{}(client: Client) {{",
            pascal_case(&action.name)
        )?;
        writeln!(
            out,
            "  return useAction<{}, {}>(client, {});",
            input_type_name(&action.name),
            pascal_case(&action.input_entity),
            quote(&action.name)
        )?;
        writeln!(out, "}}")?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::config::Config;
    use crate::normalizer::normalize;
    use crate::parser::parse;
    use crate::planner::plan;

    fn react(input: &str) -> String {
        let file = parse(input).unwrap();
        let config = Config::default();
        let (scope, _) = analyze(&file, &config.compile);
        let (normalized, _) = normalize(&file, &scope, &config);
        let (plan, _) = plan(&file, &scope, &normalized);
        render(&normalized, &plan).unwrap()
    }

    #[test]
    fn test_hook_per_view_and_action() {
        let tsx = react(
            r#"
            entity Ticket { subject: string }
            action close_ticket { input: Ticket operation: update }
            view OpenTickets { source: Ticket fields: subject }
            "#,
        );
        assert!(tsx.contains(
            "import type { Client, Ticket, CloseTicketInput, OpenTicketsRow } from \"./client\";"
        ));
        assert!(tsx.contains("export function useOpenTickets(client: Client, params?: Record<string, string>) {\n  return useList<OpenTicketsRow>(client, \"OpenTickets\", params);\n}"));
        assert!(tsx.contains("export function useCloseTicket(client: Client) {\n  return useAction<CloseTicketInput, Ticket>(client, \"close_ticket\");\n}"));
        assert!(tsx.contains("export function useList<T = unknown>"));
        assert!(tsx.contains("export function useAction<I = unknown, O = unknown>"));
        assert!(tsx.contains("client.subscribe(view"));
    }

    #[test]
    fn test_no_declarations_still_exports_generic_hooks() {
        let tsx = react("");
        assert!(tsx.contains("import type { Client } from \"./client\";"));
        assert!(tsx.contains("export function useList"));
    }
}
