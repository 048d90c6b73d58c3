//! The three kernel-state layers (spec §4.2):
//!
//! - **Layer A** — static per-link routing tables, fwmark rules, NAT, and
//!   the blackhole table, installed once at link registration.
//! - **Layer B** — per-client OUTPUT/FORWARD gates and the `magic_control`/
//!   `magic_data` ipsets, installed once at startup and per-session.
//! - **Layer C** — dynamic per-TFT mangle/filter rules, installed and torn
//!   down as sessions come and go.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use magic_tft::TftRule;

use crate::errors::DataplaneError;
use crate::executor::KernelExecutor;

pub const MAX_LINKS: usize = 10;
pub const MAX_CLIENT_RULES: usize = 256;
pub const MAX_TFT_RULES: usize = 1024;
pub const BLACKHOLE_TABLE: u32 = 99;
pub const BLACKHOLE_PRIORITY: u32 = 50;

fn link_table_id(index: usize) -> u32 {
    100 + index as u32
}

#[derive(Debug, Clone)]
struct LinkState {
    table_id: u32,
    interface_name: String,
    gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone)]
struct InstalledTftRule {
    client_ip: Ipv4Addr,
    table_id: u32,
    rule: TftRule,
}

/// The dataplane's in-memory view of what is currently installed in the
/// kernel, mirrored 1:1 against the actual `ip`/`iptables`/`ipset` state so
/// teardown can reconstruct exactly what to remove.
pub struct DataplaneController<E: KernelExecutor> {
    executor: Arc<E>,
    client_subnet_cidr: String,
    links: Mutex<HashMap<String, LinkState>>,
    tft_rules: Mutex<HashMap<String, InstalledTftRule>>,
    /// How many active sessions currently use each client IP — used by
    /// teardown to decide whether to do subnet-level cleanup.
    sessions_per_client_ip: Mutex<HashMap<Ipv4Addr, u32>>,
}

impl<E: KernelExecutor> DataplaneController<E> {
    pub fn new(executor: Arc<E>, client_subnet_cidr: impl Into<String>) -> Self {
        DataplaneController {
            executor,
            client_subnet_cidr: client_subnet_cidr.into(),
            links: Mutex::new(HashMap::new()),
            tft_rules: Mutex::new(HashMap::new()),
            sessions_per_client_ip: Mutex::new(HashMap::new()),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<(), DataplaneError> {
        self.executor.run(program, args).map_err(DataplaneError::from)
    }

    /// The underlying executor, for callers that need to inspect it (e.g.
    /// a `RecordingExecutor` in an integration test).
    pub fn executor(&self) -> &E {
        &self.executor
    }

    // ── Layer A ──────────────────────────────────────────────────────

    /// Install the blackhole table and its fwmark-99 rule at the highest
    /// priority. Call once at startup before any link is registered.
    pub fn install_blackhole_table(&self) -> Result<(), DataplaneError> {
        self.run("ip", &["route", "flush", "table", "99"])?;
        self.run("ip", &["route", "add", "blackhole", "default", "table", "99"])?;
        self.run(
            "ip",
            &[
                "rule",
                "add",
                "fwmark",
                "99",
                "lookup",
                "99",
                "priority",
                &BLACKHOLE_PRIORITY.to_string(),
            ],
        )
    }

    /// Register a link's static artifacts: routing table, fwmark rule, NAT
    /// masquerade rule. `gateway == None` installs a direct-route fallback
    /// (the interface's own link is the next hop — a test-environment
    /// case per spec §4.2).
    pub fn install_link(
        &self,
        link_id: &str,
        interface_name: &str,
        gateway: Option<Ipv4Addr>,
    ) -> Result<u32, DataplaneError> {
        let mut links = self.links.lock().unwrap();
        if links.len() >= MAX_LINKS {
            return Err(DataplaneError::TooManyLinks { max: MAX_LINKS });
        }
        let table_id = link_table_id(links.len());

        self.run("ip", &["link", "set", interface_name, "up"])?;
        self.run("ip", &["route", "flush", "table", &table_id.to_string()])?;

        match gateway {
            Some(gw) => {
                let gw_s = gw.to_string();
                self.run(
                    "ip",
                    &[
                        "route",
                        "add",
                        "default",
                        "via",
                        &gw_s,
                        "dev",
                        interface_name,
                        "table",
                        &table_id.to_string(),
                        "onlink",
                    ],
                )?;
            }
            None => {
                self.run(
                    "ip",
                    &["route", "add", "default", "dev", interface_name, "table", &table_id.to_string()],
                )?;
            }
        }

        self.run(
            "ip",
            &[
                "rule",
                "add",
                "fwmark",
                &table_id.to_string(),
                "lookup",
                &table_id.to_string(),
                "priority",
                &table_id.to_string(),
            ],
        )?;
        self.run(
            "iptables",
            &[
                "-t",
                "nat",
                "-A",
                "POSTROUTING",
                "-m",
                "mark",
                "--mark",
                &table_id.to_string(),
                "-j",
                "MASQUERADE",
            ],
        )?;

        links.insert(
            link_id.to_string(),
            LinkState {
                table_id,
                interface_name: interface_name.to_string(),
                gateway,
            },
        );
        Ok(table_id)
    }

    pub fn remove_link(&self, link_id: &str) -> Result<(), DataplaneError> {
        let mut links = self.links.lock().unwrap();
        let link = links.remove(link_id).ok_or_else(|| DataplaneError::UnknownLink(link_id.to_string()))?;
        self.run("ip", &["route", "flush", "table", &link.table_id.to_string()])?;
        self.run("ip", &["rule", "del", "fwmark", &link.table_id.to_string(), "2>/dev/null"])?;
        self.run(
            "iptables",
            &[
                "-t",
                "nat",
                "-D",
                "POSTROUTING",
                "-m",
                "mark",
                "--mark",
                &link.table_id.to_string(),
                "-j",
                "MASQUERADE",
            ],
        )
    }

    pub fn table_id_for_link(&self, link_id: &str) -> Option<u32> {
        self.links.lock().unwrap().get(link_id).map(|l| l.table_id)
    }

    // ── Layer B ──────────────────────────────────────────────────────

    /// Install the global defaults: subnet DROP gates, ipsets, and the
    /// conntrack ESTABLISHED/RELATED accept. Call once at startup.
    pub fn install_global_defaults(&self) -> Result<(), DataplaneError> {
        self.run(
            "iptables",
            &["-A", "FORWARD", "-m", "state", "--state", "ESTABLISHED,RELATED", "-j", "ACCEPT"],
        )?;
        self.run("ipset", &["create", "magic_control", "hash:ip", "family", "inet", "-exist"])?;
        self.run("ipset", &["flush", "magic_control"])?;
        self.run("ipset", &["create", "magic_data", "hash:ip", "family", "inet", "-exist"])?;
        self.run("ipset", &["flush", "magic_data"])?;
        self.run(
            "iptables",
            &["-A", "OUTPUT", "-m", "set", "--match-set", "magic_control", "src", "-j", "ACCEPT"],
        )?;
        self.run("iptables", &["-A", "OUTPUT", "-s", &self.client_subnet_cidr, "-j", "DROP"])?;
        self.run("iptables", &["-A", "FORWARD", "-s", &self.client_subnet_cidr, "-j", "DROP"])
    }

    /// Mark a client authorized for control-plane traffic (MCAR success).
    pub fn authorize_control(&self, client_ip: Ipv4Addr) -> Result<(), DataplaneError> {
        self.run("ipset", &["add", "magic_control", &client_ip.to_string(), "-exist"])
    }

    /// Prepend per-client ACCEPT rules for a session becoming ACTIVE
    /// (spec §4.2 `setup_client_link_access`).
    pub fn setup_client_link_access(
        &self,
        client_ip: Ipv4Addr,
        gateway_ip: Ipv4Addr,
        dest_ip: Option<Ipv4Addr>,
    ) -> Result<(), DataplaneError> {
        {
            let mut counts = self.sessions_per_client_ip.lock().unwrap();
            if counts.values().map(|c| *c as usize).sum::<usize>() >= MAX_CLIENT_RULES {
                return Err(DataplaneError::TooManyClientRules { max: MAX_CLIENT_RULES });
            }
            *counts.entry(client_ip).or_insert(0) += 1;
        }

        let client = client_ip.to_string();
        let dest = dest_ip
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("{}/24", gateway_ip));

        self.run("iptables", &["-I", "OUTPUT", "1", "-s", &client, "-d", &dest, "-j", "ACCEPT"])?;
        self.run("iptables", &["-I", "FORWARD", "1", "-s", &client, "-d", &dest, "-j", "ACCEPT"])?;
        self.run("iptables", &["-I", "FORWARD", "1", "-d", &client, "-s", &dest, "-j", "ACCEPT"])?;
        self.run(
            "iptables",
            &["-t", "nat", "-A", "POSTROUTING", "-s", &client, "-d", &dest, "-j", "MASQUERADE"],
        )?;
        self.run("ipset", &["add", "magic_data", &client, "-exist"])
    }

    /// Undo `setup_client_link_access` for a grant attempt that fails after
    /// the Layer-B mutation but before the session comes up, so a rejected
    /// request leaves no orphan kernel state behind (spec §8 invariant 4).
    pub fn rollback_client_link_access(
        &self,
        client_ip: Ipv4Addr,
        gateway_ip: Ipv4Addr,
        dest_ip: Option<Ipv4Addr>,
    ) -> Result<(), DataplaneError> {
        {
            let mut counts = self.sessions_per_client_ip.lock().unwrap();
            if let Some(count) = counts.get_mut(&client_ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&client_ip);
                }
            }
        }

        let client = client_ip.to_string();
        let dest = dest_ip
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("{}/24", gateway_ip));

        self.run("iptables", &["-D", "OUTPUT", "-s", &client, "-d", &dest, "-j", "ACCEPT"])?;
        self.run("iptables", &["-D", "FORWARD", "-s", &client, "-d", &dest, "-j", "ACCEPT"])?;
        self.run("iptables", &["-D", "FORWARD", "-d", &client, "-s", &dest, "-j", "ACCEPT"])?;
        self.run(
            "iptables",
            &["-t", "nat", "-D", "POSTROUTING", "-s", &client, "-d", &dest, "-j", "MASQUERADE"],
        )?;
        self.run("ipset", &["del", "magic_data", &client, "2>/dev/null"])
    }

    pub fn active_sessions_for_client_ip(&self, client_ip: Ipv4Addr) -> u32 {
        *self.sessions_per_client_ip.lock().unwrap().get(&client_ip).unwrap_or(&0)
    }

    // ── Layer C ──────────────────────────────────────────────────────

    /// Install the mangle MARK and filter ACCEPT rules for one authorized
    /// TFT, plus add the client to `magic_data`.
    pub fn install_tft_rule(
        &self,
        handle: &str,
        client_ip: Ipv4Addr,
        link_id: &str,
        rule: &TftRule,
    ) -> Result<(), DataplaneError> {
        let table_id = self
            .table_id_for_link(link_id)
            .ok_or_else(|| DataplaneError::UnknownLink(link_id.to_string()))?;

        {
            let mut rules = self.tft_rules.lock().unwrap();
            if rules.len() >= MAX_TFT_RULES {
                return Err(DataplaneError::TooManyTftRules { max: MAX_TFT_RULES });
            }
            rules.insert(
                handle.to_string(),
                InstalledTftRule {
                    client_ip,
                    table_id,
                    rule: rule.clone(),
                },
            );
        }

        self.apply_mangle_mark(rule, table_id, true)?;
        self.apply_filter_accept(rule, true)?;
        self.run("ipset", &["add", "magic_data", &client_ip.to_string(), "-exist"])
    }

    /// Swap a TFT rule's link atomically: delete the old mangle MARK,
    /// insert the new one. Filter ACCEPT and ipset membership are
    /// untouched — only the mark value changes (spec §4.2 "link switch").
    pub fn switch_tft_rule_link(&self, handle: &str, new_link_id: &str) -> Result<(), DataplaneError> {
        let new_table_id = self
            .table_id_for_link(new_link_id)
            .ok_or_else(|| DataplaneError::UnknownLink(new_link_id.to_string()))?;

        let rule = {
            let mut rules = self.tft_rules.lock().unwrap();
            let entry = rules
                .get_mut(handle)
                .ok_or_else(|| DataplaneError::UnknownTftRule(handle.to_string()))?;
            let old_rule = entry.rule.clone();
            let old_table_id = entry.table_id;
            entry.table_id = new_table_id;
            (old_rule, old_table_id)
        };
        let (tft_rule, old_table_id) = rule;

        self.apply_mangle_mark(&tft_rule, old_table_id, false)?;
        self.apply_mangle_mark(&tft_rule, new_table_id, true)
    }

    pub fn remove_tft_rule(&self, handle: &str) -> Result<(), DataplaneError> {
        let removed = self
            .tft_rules
            .lock()
            .unwrap()
            .remove(handle)
            .ok_or_else(|| DataplaneError::UnknownTftRule(handle.to_string()))?;
        self.apply_mangle_mark(&removed.rule, removed.table_id, false)?;
        self.apply_filter_accept(&removed.rule, false)
    }

    fn apply_mangle_mark(&self, rule: &TftRule, table_id: u32, insert: bool) -> Result<(), DataplaneError> {
        let flag = if insert { "-A" } else { "-D" };
        let (src, dst, sport, dport, proto) = five_tuple_args(rule);
        let mut args = vec!["-t", "mangle", flag, "PREROUTING"];
        args.extend(["-s", &src, "-d", &dst]);
        if let Some(p) = &proto {
            args.extend(["-p", p]);
            if sport != "0:65535" {
                args.extend(["--sport", &sport]);
            }
            if dport != "0:65535" {
                args.extend(["--dport", &dport]);
            }
        }
        let mark = table_id.to_string();
        args.extend(["-j", "MARK", "--set-mark", &mark]);
        self.run("iptables", &args)
    }

    fn apply_filter_accept(&self, rule: &TftRule, insert: bool) -> Result<(), DataplaneError> {
        let (src, dst, sport, dport, proto) = five_tuple_args(rule);
        let mut args: Vec<&str> = if insert {
            vec!["-I", "FORWARD", "1"]
        } else {
            vec!["-D", "FORWARD"]
        };
        args.extend(["-s", &src, "-d", &dst]);
        if let Some(p) = &proto {
            args.extend(["-p", p]);
            if sport != "0:65535" {
                args.extend(["--sport", &sport]);
            }
            if dport != "0:65535" {
                args.extend(["--dport", &dport]);
            }
        }
        args.extend(["-j", "ACCEPT"]);
        self.run("iptables", &args)
    }

    // ── Session teardown ─────────────────────────────────────────────

    /// Tear down one session's dataplane state. Per spec §4.2: if other
    /// sessions still share `client_ip`, only this session's TFT rules are
    /// removed; otherwise the full per-client gate is torn down and a
    /// blackhole rule installed.
    pub fn teardown_session(&self, client_ip: Ipv4Addr, tft_handles: &[String]) -> Result<(), DataplaneError> {
        for handle in tft_handles {
            self.remove_tft_rule(handle)?;
        }

        let mut counts = self.sessions_per_client_ip.lock().unwrap();
        let remaining = counts.get(&client_ip).copied().unwrap_or(1).saturating_sub(1);
        if remaining > 0 {
            counts.insert(client_ip, remaining);
            return Ok(());
        }
        counts.remove(&client_ip);
        drop(counts);

        let client = client_ip.to_string();
        self.run(
            "sh",
            &[
                "-c",
                &format!(
                    "iptables-save | grep -v '{client}' | iptables-restore"
                ),
            ],
        )?;
        self.run(
            "ip",
            &["rule", "add", "from", &client, "lookup", &BLACKHOLE_TABLE.to_string(), "priority", "1"],
        )?;
        self.run("ipset", &["del", "magic_control", &client, "2>/dev/null"])?;
        self.run("ipset", &["del", "magic_data", &client, "2>/dev/null"])?;
        self.run("conntrack", &["-D", "-s", &client])
    }
}

fn range_to_cidr_or_host(start: Ipv4Addr, end: Ipv4Addr) -> String {
    if start == end {
        return format!("{start}/32");
    }
    format!("{start}-{end}")
}

fn five_tuple_args(rule: &TftRule) -> (String, String, String, String, Option<String>) {
    let src = range_to_cidr_or_host(rule.src_ip_range.start, rule.src_ip_range.end);
    let dst = range_to_cidr_or_host(rule.dst_ip_range.start, rule.dst_ip_range.end);
    let sport = format!("{}:{}", rule.src_port_range.start, rule.src_port_range.end);
    let dport = format!("{}:{}", rule.dst_port_range.start, rule.dst_port_range.end);
    let proto = rule.protocol.map(|p| match p {
        6 => "tcp".to_string(),
        17 => "udp".to_string(),
        other => other.to_string(),
    });
    (src, dst, sport, dport, proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;
    use magic_tft::TftRule;

    fn controller() -> DataplaneController<RecordingExecutor> {
        DataplaneController::new(Arc::new(RecordingExecutor::new()), "192.168.0.0/24")
    }

    fn sample_rule() -> TftRule {
        TftRule::parse("_iTFT=,,,192.168.0.10.255.255.255.255,10.2.2.0.255.255.255.0,6,80.80,1024.65535").unwrap()
    }

    #[test]
    fn install_link_assigns_sequential_table_ids_from_100() {
        let dp = controller();
        let t1 = dp.install_link("LINK_WIFI", "eth0", Some(Ipv4Addr::new(192, 168, 126, 1))).unwrap();
        let t2 = dp.install_link("LINK_SATCOM", "eth1", None).unwrap();
        assert_eq!(t1, 100);
        assert_eq!(t2, 101);
    }

    #[test]
    fn too_many_links_is_rejected() {
        let dp = controller();
        for i in 0..MAX_LINKS {
            dp.install_link(&format!("LINK_{i}"), "eth0", None).unwrap();
        }
        assert!(dp.install_link("LINK_OVERFLOW", "eth0", None).is_err());
    }

    #[test]
    fn seed_s1_installs_exactly_one_mangle_and_one_filter_rule() {
        let dp = controller();
        dp.install_link("LINK_WIFI", "eth0", Some(Ipv4Addr::new(192, 168, 126, 1))).unwrap();
        let rule = sample_rule();
        dp.install_tft_rule("rule_1", Ipv4Addr::new(192, 168, 0, 10), "LINK_WIFI", &rule).unwrap();

        let executor = &dp.executor;
        let commands = executor.commands();
        let mangle_count = commands.iter().filter(|c| c.contains("mangle") && c.contains("set-mark 100")).count();
        let forward_accept_count = commands
            .iter()
            .filter(|c| c.contains("FORWARD") && c.contains("ACCEPT") && c.contains("192.168.0.10"))
            .count();
        assert_eq!(mangle_count, 1);
        assert_eq!(forward_accept_count, 1);
    }

    #[test]
    fn switch_link_changes_mark_without_touching_filter_rule() {
        let dp = controller();
        dp.install_link("LINK_WIFI", "eth0", Some(Ipv4Addr::new(192, 168, 126, 1))).unwrap();
        dp.install_link("LINK_SATCOM", "eth1", None).unwrap();
        let rule = sample_rule();
        dp.install_tft_rule("rule_1", Ipv4Addr::new(192, 168, 0, 10), "LINK_WIFI", &rule).unwrap();
        dp.executor.commands.lock().unwrap().clear();

        dp.switch_tft_rule_link("rule_1", "LINK_SATCOM").unwrap();
        let commands = dp.executor.commands();
        assert!(commands.iter().any(|c| c.contains("-D") && c.contains("set-mark 100")));
        assert!(commands.iter().any(|c| c.contains("-A") && c.contains("set-mark 101")));
        assert!(!commands.iter().any(|c| c.contains("FORWARD") && c.contains("-D")));
    }

    #[test]
    fn teardown_with_other_sessions_only_removes_tft_rules() {
        let dp = controller();
        dp.install_link("LINK_WIFI", "eth0", Some(Ipv4Addr::new(192, 168, 126, 1))).unwrap();
        let rule = sample_rule();
        let client_ip = Ipv4Addr::new(192, 168, 0, 10);
        dp.setup_client_link_access(client_ip, Ipv4Addr::new(192, 168, 126, 1), None).unwrap();
        dp.setup_client_link_access(client_ip, Ipv4Addr::new(192, 168, 126, 1), None).unwrap(); // second session, same IP
        dp.install_tft_rule("rule_1", client_ip, "LINK_WIFI", &rule).unwrap();
        dp.executor.commands.lock().unwrap().clear();

        dp.teardown_session(client_ip, &["rule_1".to_string()]).unwrap();
        let commands = dp.executor.commands();
        assert!(!commands.iter().any(|c| c.contains("iptables-save")));
        assert_eq!(dp.active_sessions_for_client_ip(client_ip), 1);
    }

    #[test]
    fn teardown_last_session_does_full_cleanup() {
        let dp = controller();
        dp.install_link("LINK_WIFI", "eth0", Some(Ipv4Addr::new(192, 168, 126, 1))).unwrap();
        let rule = sample_rule();
        let client_ip = Ipv4Addr::new(192, 168, 0, 10);
        dp.setup_client_link_access(client_ip, Ipv4Addr::new(192, 168, 126, 1), None).unwrap();
        dp.install_tft_rule("rule_1", client_ip, "LINK_WIFI", &rule).unwrap();
        dp.executor.commands.lock().unwrap().clear();

        dp.teardown_session(client_ip, &["rule_1".to_string()]).unwrap();
        let commands = dp.executor.commands();
        assert!(commands.iter().any(|c| c.contains("iptables-save")));
        assert!(commands.iter().any(|c| c.contains("blackhole") || c.contains("99")));
        assert_eq!(dp.active_sessions_for_client_ip(client_ip), 0);
    }
}
