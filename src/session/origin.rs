//! The independently hosted applications and which role slots each serves.

use url::Url;

use crate::token::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginKind {
    /// Patient portal, serves the `user` slot.
    Patient,
    /// Shared admin/clinician console, serves `admin` and `doctor` as
    /// mutually exclusive active roles.
    Console,
}

impl OriginKind {
    /// Served slots in priority order.
    #[must_use]
    pub const fn served_slots(self) -> &'static [Role] {
        match self {
            Self::Patient => &[Role::User],
            Self::Console => &[Role::Admin, Role::Doctor],
        }
    }

    #[must_use]
    pub fn serves(self, role: Role) -> bool {
        Self::for_role(role) == self
    }

    /// Where a role's session lives.
    #[must_use]
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::User => Self::Patient,
            Role::Admin | Role::Doctor => Self::Console,
        }
    }

    /// Slots that cannot be active alongside `role` on this origin.
    pub fn exclusive_with(self, role: Role) -> impl Iterator<Item = Role> {
        self.served_slots()
            .iter()
            .copied()
            .filter(move |slot| *slot != role)
    }
}

/// Base URLs of the deployed applications. The doctor console defaults to
/// the admin console URL because both roles share one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    patient_url: Url,
    admin_url: Url,
    doctor_url: Url,
}

impl OriginConfig {
    #[must_use]
    pub fn new(patient_url: Url, admin_url: Url) -> Self {
        Self {
            patient_url,
            doctor_url: admin_url.clone(),
            admin_url,
        }
    }

    #[must_use]
    pub fn with_doctor_url(mut self, doctor_url: Url) -> Self {
        self.doctor_url = doctor_url;
        self
    }

    /// Application that holds sessions for `role`.
    #[must_use]
    pub const fn destination(&self, role: Role) -> &Url {
        match role {
            Role::User => &self.patient_url,
            Role::Admin => &self.admin_url,
            Role::Doctor => &self.doctor_url,
        }
    }
}
