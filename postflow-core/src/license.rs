//! License acceptance.

use std::env;

use crate::LICENSE_ENV_VAR;

/// Whether the user accepted the license agreement through the environment.
/// The engine enforces this at operator creation; this helper lets bindings
/// and the fixture engine apply the same rule.
pub fn license_accepted() -> bool {
    match env::var(LICENSE_ENV_VAR) {
        Ok(v) => {
            let v = v.trim().to_lowercase();
            v == "y" || v == "yes" || v == "true" || v == "1"
        }
        Err(_) => false,
    }
}
