//! Reporting sink contract
//!
//! Output is hierarchical: a reporter holds sections (one per plugin or phase),
//! a section holds checks (one per step), and each check ends in success,
//! warning or error.

pub trait Reporter: Send + Sync {
    fn add_section(&self, name: &str) -> Box<dyn Section>;
}

pub trait Section: Send + Sync {
    fn add_check(&self, name: &str) -> Box<dyn Check>;
}

pub trait Check: Send + Sync {
    fn update_status(&self, message: &str);
    fn success(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}
