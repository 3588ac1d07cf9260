use std::error::Error;

use super::block::HASH_BITS;

/// Runtime parameters of a node. `capacity`, `difficulty` and `nodes` must
/// agree across the whole network; they are fixed at launch.
#[derive(Clone, Debug)]
pub struct Config {
    /// Port the node listens on.
    pub port: u16,
    /// Number of transactions per block. A block is only mined once the
    /// queue holds at least this many.
    pub capacity: usize,
    /// Leading zero bits required of a block hash.
    pub difficulty: u32,
    /// Fixed number of peers in the network, known a priori.
    pub nodes: usize,
    /// Whether this node mints the genesis supply and assigns ids.
    pub bootstrap: bool,
    /// `host:port` of the bootstrap node; required unless `bootstrap`.
    pub bootstrap_addr: Option<String>,
}

impl Config {
    pub fn new(
        port: u16,
        capacity: usize,
        difficulty: u32,
        nodes: usize,
        bootstrap: bool,
        bootstrap_addr: Option<String>,
    ) -> Result<Config, Box<dyn Error>> {
        if capacity == 0 {
            return Err("capacity must be at least 1".into());
        }

        if difficulty == 0 || difficulty >= HASH_BITS {
            return Err(format!("difficulty must be in [1, {})", HASH_BITS).into());
        }

        if nodes == 0 {
            return Err("the network needs at least 1 node".into());
        }

        if !bootstrap && bootstrap_addr.is_none() {
            return Err("non-bootstrap nodes need the bootstrap address".into());
        }

        Ok(Config {
            port,
            capacity,
            difficulty,
            nodes,
            bootstrap,
            bootstrap_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_demo_parameters() {
        let config = Config::new(5000, 2, 1, 3, true, None).unwrap();
        assert_eq!(config.capacity, 2);
        assert_eq!(config.difficulty, 1);
        assert_eq!(config.nodes, 3);
    }

    #[test]
    fn rejects_zero_difficulty() {
        assert!(Config::new(5000, 2, 0, 3, true, None).is_err());
        assert!(Config::new(5000, 2, 160, 3, true, None).is_err());
        assert!(Config::new(5000, 2, 159, 3, true, None).is_ok());
    }

    #[test]
    fn rejects_zero_capacity_and_nodes() {
        assert!(Config::new(5000, 0, 1, 3, true, None).is_err());
        assert!(Config::new(5000, 2, 1, 0, true, None).is_err());
    }

    #[test]
    fn joiner_needs_bootstrap_address() {
        assert!(Config::new(5001, 2, 1, 3, false, None).is_err());
        assert!(Config::new(5001, 2, 1, 3, false, Some("127.0.0.1:5000".into())).is_ok());
    }
}
