// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{Calculation, CalculationStatus};

/// Texts for one calculation: what the owner gets and the operator copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_text: String,
    pub operator_text: String,
}

/// `None` for statuses that do not produce a notification.
pub fn compose(calc: &Calculation, link: Option<&str>) -> Option<Notification> {
    match calc.status {
        CalculationStatus::FailedToUpload => Some(Notification {
            user_text: format!(
                "Calculation {} could not be uploaded. Try again later or contact the administrator.",
                calc.name
            ),
            operator_text: format!(
                "Calculation {} of user #{} could not be uploaded.",
                calc.name, calc.user.id
            ),
        }),
        CalculationStatus::Clouded => {
            let results = match link {
                Some(link) => format!("Results are available at {link}"),
                None => "Results are archived, but no share link could be created.".to_string(),
            };
            Some(Notification {
                user_text: format!("Calculation {} has finished. {results}", calc.name),
                operator_text: format!(
                    "Calculation {} of user #{} has finished. {results}",
                    calc.name, calc.user.id
                ),
            })
        }
        _ => None,
    }
}
