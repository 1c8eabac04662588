use std::fmt;
use uuid::Uuid;

const DEFAULT_NAME: &str = "Player";

/// Identity assigned to a Java client when it starts logging in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    name: String,
    id: Uuid,
}

impl Player {
    /// Creates a player from the raw name sent in Login Start.
    ///
    /// Underscores are removed; an empty result falls back to `"Player"`.
    pub fn from_login_name(raw_name: &str) -> Self {
        Self::new(sanitize_name(raw_name), Uuid::new_v4())
    }

    pub fn new(name: impl Into<String>, id: Uuid) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

fn sanitize_name(raw_name: &str) -> String {
    let name = raw_name.replace('_', "");
    if name.is_empty() {
        DEFAULT_NAME.to_owned()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underscores_are_stripped() {
        assert_eq!(Player::from_login_name("Notch_123").name(), "Notch123");
        assert_eq!(Player::from_login_name("_a_b_").name(), "ab");
    }

    #[test]
    fn empty_name_falls_back() {
        assert_eq!(Player::from_login_name("___").name(), "Player");
        assert_eq!(Player::from_login_name("").name(), "Player");
    }

    #[test]
    fn ids_are_fresh() {
        let a = Player::from_login_name("Steve");
        let b = Player::from_login_name("Steve");
        assert_ne!(a.id(), b.id());
    }
}
