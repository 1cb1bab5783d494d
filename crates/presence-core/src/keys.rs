//! Logical key layout under the shared store

pub const DEVICES: &str = "devices/";
pub const HOMES: &str = "homes/";
pub const ALIVE: &str = "alive/";
pub const BLES: &str = "bles/";
pub const COMMANDS: &str = "cq/";
pub const PEOPLE: &str = "people/";
pub const LAST_NOTIFICATION: &str = "notifications/last";

pub fn device(id: &str) -> String {
    format!("{DEVICES}{id}")
}

pub fn home(home: &str) -> String {
    format!("{HOMES}{home}")
}

/// Liveness key for one entity at one home
pub fn alive(home: &str, mac: &str) -> String {
    format!("{ALIVE}{home}/{mac}")
}

/// Prefix covering every live entity at a home
pub fn alive_in(home: &str) -> String {
    format!("{ALIVE}{home}/")
}

pub fn ble(id: &str) -> String {
    format!("{BLES}{id}")
}

pub fn command(id: &str) -> String {
    format!("{COMMANDS}{id}")
}

pub fn person(name: &str) -> String {
    format!("{PEOPLE}{name}")
}

/// Split an `alive/{home}/{mac}` key into its home and mac
///
/// The mac may itself contain `/` (synthesized identities do).
pub fn parse_alive(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(ALIVE)?.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alive() {
        assert_eq!(
            parse_alive("alive/office/aa:bb:cc:dd:ee:ff"),
            Some(("office", "aa:bb:cc:dd:ee:ff"))
        );
        assert_eq!(
            parse_alive("alive/office/office/10_0_0_5"),
            Some(("office", "office/10_0_0_5"))
        );
        assert_eq!(parse_alive("devices/x"), None);
    }
}
