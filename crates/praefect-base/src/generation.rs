/// Generation is a monotonic version counter for a single physical
/// replica of a repository (spec.md §3). `Unknown` is a distinct value
/// meaning "never observed" rather than a sentinel integer (spec.md
/// §9, "Design Notes" — use a tagged variant, not a sentinel). `Unknown`
/// compares as less than any `Known` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generation {
    #[default]
    Unknown,
    Known(i64),
}

impl Generation {
    pub fn known(value: i64) -> Self {
        Generation::Known(value)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Generation::Unknown)
    }

    /// The value to use when advancing this generation: one past the
    /// maximum of this replica's current generation and the new
    /// cluster-wide maximum it is joining.
    pub fn advanced_from(current_max: Generation) -> Generation {
        match current_max {
            Generation::Unknown => Generation::Known(0),
            Generation::Known(v) => Generation::Known(v + 1),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Generation::Unknown => None,
            Generation::Known(v) => Some(*v),
        }
    }

    pub fn from_nullable(value: Option<i64>) -> Self {
        match value {
            Some(v) => Generation::Known(v),
            None => Generation::Unknown,
        }
    }
}

impl PartialOrd for Generation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Generation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Generation::Unknown, Generation::Unknown) => std::cmp::Ordering::Equal,
            (Generation::Unknown, Generation::Known(_)) => std::cmp::Ordering::Less,
            (Generation::Known(_), Generation::Unknown) => std::cmp::Ordering::Greater,
            (Generation::Known(a), Generation::Known(b)) => a.cmp(b),
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Unknown => write!(f, "unknown"),
            Generation::Known(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_is_less_than_any_known() {
        assert!(Generation::Unknown < Generation::Known(0));
        assert!(Generation::Unknown < Generation::Known(i64::MIN));
    }

    #[test]
    fn advancement_steps_one_past_the_max() {
        assert_eq!(Generation::advanced_from(Generation::Unknown), Generation::Known(0));
        assert_eq!(Generation::advanced_from(Generation::Known(4)), Generation::Known(5));
    }

    #[test]
    fn max_of_known_generations_picks_the_largest() {
        let gens = [Generation::Known(1), Generation::Known(3), Generation::Unknown];
        assert_eq!(gens.iter().copied().max().unwrap(), Generation::Known(3));
    }
}
