use std::path::PathBuf;

/// One case entry after campaign linearization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseDescriptor {
    /// Case file path as written in the campaign element.
    pub id: String,
    /// Resolved path of the case file on disk.
    pub path: PathBuf,
    /// Position in the linearized campaign, starting at 1.
    pub order: usize,
    /// Back-to-back iterations inside one attempt.
    pub b2b: u32,
    /// Downgrades a final `Fail` to pass in the campaign aggregate.
    pub warning: bool,
    /// Provisioning cases are never retried.
    pub provisioning: bool,
    /// A non-pass verdict on this case stops the campaign.
    pub stop_on_failure: bool,
}

impl TestCaseDescriptor {
    pub fn new(id: &str, path: PathBuf) -> Self {
        Self {
            id: id.to_owned(),
            path,
            order: 0,
            b2b: 1,
            warning: false,
            provisioning: false,
            stop_on_failure: false,
        }
    }
}

/// A campaign linearized into an ordered case list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignDescriptor {
    pub name: String,
    pub cases: Vec<TestCaseDescriptor>,
}
