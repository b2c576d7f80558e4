//! Per-process `leaseholder_id` generation (spec.md 4.5: "A unique
//! per-process `leaseholder_id` is generated at startup (hostname + PID +
//! random)"). The only genuinely process-global state in the system
//! (DESIGN NOTES §9) -- safe because it never changes after startup.

use rand::Rng;

pub fn generate_leaseholder_id() -> String {
    let hostname = hostname();
    let pid = std::process::id();
    let random: u32 = rand::thread_rng().gen();
    format!("{hostname}-{pid}-{random:08x}")
}

fn hostname() -> String {
    std::env::var("HOSTNAME").ok().or_else(|| std::env::var("COMPUTERNAME").ok()).unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaseholder_id_has_three_dash_separated_parts() {
        let id = generate_leaseholder_id();
        assert_eq!(id.splitn(3, '-').count(), 3);
    }

    #[test]
    fn leaseholder_ids_are_unique() {
        assert_ne!(generate_leaseholder_id(), generate_leaseholder_id());
    }
}
