use crate::models::identity::Identity;
use crate::models::job::Job;

/// Authorization decisions for job reads and audit queries.
pub struct AccessGuard;

impl AccessGuard {
    /// Owners read their own jobs; admins read everything.
    pub fn can_read(job: &Job, caller: &Identity) -> bool {
        caller.subject == job.owner_id || caller.is_admin()
    }

    /// Only the admin role may query the audit log.
    pub fn can_audit(caller: &Identity) -> bool {
        caller.is_admin()
    }
}
