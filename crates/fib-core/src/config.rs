//! Process-wide configuration (base spec §9 "Global mutables"): parsed
//! once at startup, handed around by shared reference, never mutated
//! after construction.

use clap::Parser;

/// CLI surface. The daemon core treats flags opaquely beyond what feeds
/// [`Context`] — richer route/VRF manipulation is driven over the
/// control socket, not argv (base spec §6 "CLI surface").
#[derive(Debug, Parser)]
#[command(name = "fibsyncd", about = "Kernel FIB synchronization daemon")]
pub struct Cli {
    /// Maximum ECMP nexthops programmed into a single kernel request.
    #[arg(long, default_value_t = 8)]
    pub multipath_num: u8,

    /// Permit route deletion; off makes the daemon add/replace-only.
    #[arg(long, default_value_t = true)]
    pub allow_delete: bool,

    /// Allow IPv4 nexthop resolution to fall back to the default route.
    #[arg(long)]
    pub resolve_via_default_v4: bool,

    /// Allow IPv6 nexthop resolution to fall back to the default route.
    #[arg(long)]
    pub resolve_via_default_v6: bool,

    /// Extra kernel table ids to import beyond 254/253/255, as `N` or
    /// `N-M` ranges. Repeatable.
    #[arg(long = "import-table")]
    pub import_tables: Vec<String>,
}

/// One inclusive table-id range accepted by `is_zebra_valid_kernel_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRange {
    pub start: u32,
    pub end: u32,
}

impl TableRange {
    pub fn contains(&self, table: u32) -> bool {
        (self.start..=self.end).contains(&table)
    }
}

/// Read-only-after-startup process configuration (base spec §5
/// "Shared-resource policy": `multipath_num` and the `resolve-via-default`
/// booleans are the only process-wide mutable state, and both are fixed
/// at process start).
#[derive(Debug, Clone)]
pub struct Context {
    pub multipath_num: u8,
    pub allow_delete: bool,
    pub resolve_via_default_v4: bool,
    pub resolve_via_default_v6: bool,
    import_tables: Vec<TableRange>,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> crate::Result<Self> {
        let mut import_tables = Vec::with_capacity(cli.import_tables.len());
        for spec in &cli.import_tables {
            import_tables.push(parse_table_range(spec)?);
        }
        Ok(Self {
            multipath_num: cli.multipath_num.max(1),
            allow_delete: cli.allow_delete,
            resolve_via_default_v4: cli.resolve_via_default_v4,
            resolve_via_default_v6: cli.resolve_via_default_v6,
            import_tables,
        })
    }

    /// `resolve_via_default` for the family of a given prefix.
    pub fn resolve_via_default_for(&self, prefix: &crate::address::Prefix) -> bool {
        if prefix.is_v6() {
            self.resolve_via_default_v6
        } else {
            self.resolve_via_default_v4
        }
    }

    /// Table admission (base spec §6 `is_zebra_valid_kernel_table`): 254
    /// main / 253 default / 255 local are always accepted; anything else
    /// needs a configured import range.
    pub fn is_valid_kernel_table(&self, table: u32) -> bool {
        use crate::netlink::messages::route::table;
        if table == table::MAIN as u32 || table == table::DEFAULT as u32 || table == table::LOCAL as u32 {
            return true;
        }
        self.import_tables.iter().any(|range| range.contains(table))
    }
}

fn parse_table_range(spec: &str) -> crate::Result<TableRange> {
    let invalid = || crate::Error::Invalid(format!("invalid import-table range: {spec}"));
    match spec.split_once('-') {
        Some((start, end)) => {
            let start: u32 = start.trim().parse().map_err(|_| invalid())?;
            let end: u32 = end.trim().parse().map_err(|_| invalid())?;
            if start > end {
                return Err(invalid());
            }
            Ok(TableRange { start, end })
        }
        None => {
            let value: u32 = spec.trim().parse().map_err(|_| invalid())?;
            Ok(TableRange { start: value, end: value })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(import_tables: Vec<&str>) -> Cli {
        Cli {
            multipath_num: 8,
            allow_delete: true,
            resolve_via_default_v4: false,
            resolve_via_default_v6: false,
            import_tables: import_tables.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn main_default_local_always_valid() {
        let ctx = Context::from_cli(&cli_with(vec![])).unwrap();
        assert!(ctx.is_valid_kernel_table(254));
        assert!(ctx.is_valid_kernel_table(253));
        assert!(ctx.is_valid_kernel_table(255));
        assert!(!ctx.is_valid_kernel_table(100));
    }

    #[test]
    fn configured_range_extends_admission() {
        let ctx = Context::from_cli(&cli_with(vec!["100-110"])).unwrap();
        assert!(ctx.is_valid_kernel_table(100));
        assert!(ctx.is_valid_kernel_table(110));
        assert!(!ctx.is_valid_kernel_table(111));
    }

    #[test]
    fn single_table_value_is_a_one_element_range() {
        let ctx = Context::from_cli(&cli_with(vec!["42"])).unwrap();
        assert!(ctx.is_valid_kernel_table(42));
        assert!(!ctx.is_valid_kernel_table(43));
    }

    #[test]
    fn malformed_range_rejected() {
        assert!(Context::from_cli(&cli_with(vec!["10-5"])).is_err());
        assert!(Context::from_cli(&cli_with(vec!["abc"])).is_err());
    }

    #[test]
    fn multipath_num_floor_is_one() {
        let mut cli = cli_with(vec![]);
        cli.multipath_num = 0;
        let ctx = Context::from_cli(&cli).unwrap();
        assert_eq!(ctx.multipath_num, 1);
    }
}
