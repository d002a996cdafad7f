//! Filter lists bound to an interface direction.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{join_numbers, parse_number};

/// Traffic direction of a filter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Device keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub(crate) fn parse(token: &str) -> Option<Self> {
        match token {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static and dynamic filter numbers applied in one direction.
///
/// Fields holding a binding are `Option<FilterBinding>`: `None` means the
/// direction is not configured at all, while an empty binding is printed as
/// the bare command (`ip lan1 secure filter in`) and means "no filters".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterBinding {
    /// Static filter numbers in evaluation order.
    pub filters: Vec<u32>,

    /// Dynamic filter numbers following the `dynamic` keyword.
    #[serde(default)]
    pub dynamic: Vec<u32>,
}

impl FilterBinding {
    /// Create a binding of static filters.
    pub fn new(filters: impl Into<Vec<u32>>) -> Self {
        Self {
            filters: filters.into(),
            dynamic: Vec::new(),
        }
    }

    /// Set the dynamic filters.
    pub fn with_dynamic(mut self, dynamic: impl Into<Vec<u32>>) -> Self {
        self.dynamic = dynamic.into();
        self
    }

    /// Check whether the binding holds no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.dynamic.is_empty()
    }

    /// Parse the numbers after the direction keyword.
    pub(crate) fn parse(rest: &str) -> Result<Self, String> {
        let mut binding = FilterBinding::default();
        let mut in_dynamic = false;
        for token in rest.split_whitespace() {
            if token == "dynamic" {
                if in_dynamic {
                    return Err("duplicate dynamic keyword".into());
                }
                in_dynamic = true;
                continue;
            }
            let number = parse_number(token, "filter number")?;
            if in_dynamic {
                binding.dynamic.push(number);
            } else {
                binding.filters.push(number);
            }
        }
        if in_dynamic && binding.dynamic.is_empty() {
            return Err("dynamic keyword without filters".into());
        }
        Ok(binding)
    }

    /// Render the numbers after the direction keyword; empty for an empty binding.
    pub(crate) fn render(&self) -> String {
        let mut out = join_numbers(&self.filters);
        if !self.dynamic.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str("dynamic ");
            out.push_str(&join_numbers(&self.dynamic));
        }
        out
    }
}

/// Render `prefix dir [numbers]` without a trailing space.
pub(crate) fn binding_command(prefix: &str, direction: Direction, binding: &FilterBinding) -> String {
    let numbers = binding.render();
    if numbers.is_empty() {
        format!("{} {}", prefix, direction)
    } else {
        format!("{} {} {}", prefix, direction, numbers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_static_and_dynamic() {
        let binding = FilterBinding::parse("200020 200021 dynamic 200080 200081").unwrap();
        assert_eq!(binding.filters, vec![200020, 200021]);
        assert_eq!(binding.dynamic, vec![200080, 200081]);
        assert_eq!(binding.render(), "200020 200021 dynamic 200080 200081");
    }

    #[test]
    fn test_empty_binding() {
        let binding = FilterBinding::parse("").unwrap();
        assert!(binding.is_empty());
        assert_eq!(
            binding_command("ip lan1 secure filter", Direction::In, &binding),
            "ip lan1 secure filter in"
        );
    }

    #[test]
    fn test_dynamic_only() {
        let binding = FilterBinding::default().with_dynamic(vec![5]);
        assert_eq!(binding.render(), "dynamic 5");
        assert_eq!(FilterBinding::parse("dynamic 5").unwrap(), binding);
    }

    #[test]
    fn test_parse_errors() {
        assert!(FilterBinding::parse("1 two").is_err());
        assert!(FilterBinding::parse("1 dynamic").is_err());
        assert!(FilterBinding::parse("dynamic 1 dynamic 2").is_err());
    }
}
