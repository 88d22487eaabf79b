//! URL construction for lab API operations and portal links.

use crate::config::LabConfig;

/// Resolves `{scheme}://{host}{context_path}{path}` for each lab operation.
///
/// # Example
///
/// ```
/// use labrun::client::Endpoint;
/// use labrun::config::LabConfig;
///
/// let lab = LabConfig {
///     host: "lab.example.com".to_string(),
///     context_path: "/lab".to_string(),
///     ..Default::default()
/// };
/// let endpoint = Endpoint::from_config(&lab);
///
/// assert_eq!(
///     endpoint.status_url("t-1"),
///     "https://lab.example.com/lab/api/test/task/t-1"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
    upload_path: String,
    run_path: String,
    status_path: String,
    portal_task_path: String,
    portal_video_path: String,
}

impl Endpoint {
    pub fn from_config(lab: &LabConfig) -> Self {
        Self {
            base: format!("{}://{}{}", lab.scheme, lab.host, lab.context_path),
            upload_path: lab.upload_path.clone(),
            run_path: lab.run_path.clone(),
            status_path: lab.status_path.clone(),
            portal_task_path: lab.portal_task_path.clone(),
            portal_video_path: lab.portal_video_path.clone(),
        }
    }

    /// `{scheme}://{host}{context_path}`
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn upload_url(&self) -> String {
        format!("{}{}", self.base, self.upload_path)
    }

    pub fn run_url(&self) -> String {
        format!("{}{}", self.base, self.run_path)
    }

    pub fn status_url(&self, task_id: &str) -> String {
        format!("{}{}{}", self.base, self.status_path, task_id)
    }

    /// Portal page with the full report of a task.
    pub fn task_report_url(&self, task_id: &str) -> String {
        format!("{}{}{}", self.base, self.portal_task_path, task_id)
    }

    /// Portal page with the recording of one device result.
    pub fn device_video_url(&self, device_result_id: &str) -> String {
        format!("{}{}{}", self.base, self.portal_video_path, device_result_id)
    }

    /// Absolute URL of a static resource served by the lab.
    pub fn static_resource_url(&self, resource_path: &str) -> String {
        format!("{}{}", self.base, resource_path)
    }
}
