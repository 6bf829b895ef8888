//! Identifier transforms shared by the SQL and TypeScript emitters.

use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};

/// Table name for an entity: snake_case, pluralised.
pub fn table_name(entity: &str) -> String {
    pluralize(&entity.to_snake_case())
}

pub fn pascal_case(name: &str) -> String {
    name.to_upper_camel_case()
}

pub fn camel_case(name: &str) -> String {
    name.to_lower_camel_case()
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("Ticket"), "tickets");
        assert_eq!(table_name("OrderItem"), "order_items");
        assert_eq!(table_name("Category"), "categories");
        assert_eq!(table_name("Day"), "days");
        assert_eq!(table_name("Address"), "addresses");
        assert_eq!(table_name("Branch"), "branches");
    }

    #[test]
    fn test_case_transforms() {
        assert_eq!(pascal_case("close_ticket"), "CloseTicket");
        assert_eq!(camel_case("close_ticket"), "closeTicket");
        assert_eq!(camel_case("OpenTickets"), "openTickets");
        assert_eq!(pascal_case("OpenTickets"), "OpenTickets");
    }
}
