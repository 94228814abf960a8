//! Owner-facing message templates
//!
//! Placeholders are `{name}`; `{queue}` and `{build_log}` are always filled.

pub(crate) const APPLY_SUCCESS: &str = "{queue} has picked up your change.\n\
     You can follow along at {build_log}.\n\
     You can find the CL status and build information at {cl_status_url}.";

pub(crate) const COULD_NOT_APPLY: &str =
    "{queue} failed to apply your change in {build_log} . {failure}";

pub(crate) const INFLIGHT_CONFLICT: &str = "{queue} could not apply your change because it \
     conflicts with other change(s) that it is testing. If those changes do not pass your \
     change will be retried. Otherwise it will be rejected at the end of this CQ run.";

pub(crate) const DRAFT_CHANGE: &str = "{queue} could not apply your change because the latest \
     patch set is not published. Please publish your draft patch set before marking your commit \
     as ready.";

pub(crate) const PRIVATE_CHANGE: &str = "{queue} could not apply your change because the CL is \
     private. Please make your CL public before marking your commit as ready.";

pub(crate) const COULD_NOT_SUBMIT: &str =
    "{queue} failed to submit your change in {build_log} . {error}";

pub(crate) const INCORRECT_SUBMISSION: &str =
    "{queue} incorrectly submitted your change in {build_log} .  {failure}";

pub(crate) const VALIDATION_TIMEOUT: &str = "{queue} timed out while verifying your change in \
     {build_log} . This means that a supporting builder did not finish building your change \
     within the specified timeout. If you believe this happened in error, just re-mark your \
     commit as ready. Your change will then get automatically retried.";

pub(crate) const VALIDATION_TIMEOUT_RETRY: &str = "NOTE: {queue} will retry your change \
     automatically.\n\n{queue} timed out while verifying your change in {build_log} . This \
     means that a supporting builder did not finish building your change within the specified \
     timeout. The timeout may have been caused by infrastructure issues, so your change will \
     not be blamed for it.";

pub(crate) const VALIDATION_FAILED: &str = "{queue} failed to verify your change in \
     {build_log} .\n\n{details}\n\nYou can find the CL status and build information at \
     {cl_status_url}.";

pub(crate) const VALIDATION_FAILED_RETRY: &str = "{queue} failed to verify your change in \
     {build_log} , but the failure does not look like it was caused by your change. It will be \
     retried automatically.\n\n{details}";

pub(crate) const STILL_SUBMITTED: &str = "The commit queue submitted this change, but Gerrit \
     still reports it as SUBMITTED. Please check that it merged, and ping the build sheriff if \
     it did not.";

/// Substitute `{key}` placeholders
pub(crate) fn render(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
