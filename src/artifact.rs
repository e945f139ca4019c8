//! The templates produced by a successful build.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cloud::CloudClient;
use crate::pipeline::ZoneSlot;

/// Builder identifier reported alongside artifacts.
pub const BUILDER_ID: &str = "upcloudltd.upcloud";

/// One finished template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplateRecord {
    /// Zone holding the template.
    pub zone: String,
    /// Template storage identifier.
    pub uuid: String,
    /// Template title.
    pub title: String,
}

impl TemplateRecord {
    /// Parses a `zone:uuid` reference as printed by [`Artifact::id`].
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::InvalidReference`] when either half is
    /// missing.
    pub fn parse(reference: &str) -> Result<Self, ArtifactError> {
        let invalid = || ArtifactError::InvalidReference(reference.to_owned());
        let (zone, uuid) = reference.trim().split_once(':').ok_or_else(invalid)?;
        if zone.is_empty() || uuid.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            zone: zone.to_owned(),
            uuid: uuid.to_owned(),
            title: String::new(),
        })
    }
}

/// Ordered list of templates, one per build zone, plus the client that can
/// delete them.
pub struct Artifact<C> {
    templates: Vec<TemplateRecord>,
    client: Arc<C>,
}

impl<C> fmt::Debug for Artifact<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

impl<C: CloudClient> Artifact<C> {
    /// Builds an artifact from completed slots, in zone order.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Incomplete`] naming the first zone without a
    /// template.
    pub fn from_slots(slots: &[ZoneSlot], client: Arc<C>) -> Result<Self, ArtifactError> {
        let templates = slots
            .iter()
            .map(|slot| {
                slot.template
                    .as_ref()
                    .map(|template| TemplateRecord {
                        zone: slot.zone.clone(),
                        uuid: template.uuid.clone(),
                        title: template.title.clone(),
                    })
                    .ok_or_else(|| ArtifactError::Incomplete {
                        zone: slot.zone.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { templates, client })
    }

    /// Wraps previously built templates, for example ones named on the
    /// command line.
    #[must_use]
    pub const fn from_records(templates: Vec<TemplateRecord>, client: Arc<C>) -> Self {
        Self { templates, client }
    }

    /// Templates in zone order.
    #[must_use]
    pub fn templates(&self) -> &[TemplateRecord] {
        &self.templates
    }

    /// Builder identifier.
    #[must_use]
    pub const fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// One `zone:uuid` line per template.
    #[must_use]
    pub fn id(&self) -> String {
        self.templates
            .iter()
            .map(|record| format!("{}:{}\n", record.zone, record.uuid))
            .collect()
    }

    /// Deletes every template in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Delete`] for the first template that could
    /// not be deleted. Templates after it are left in place.
    pub async fn destroy(&self) -> Result<(), ArtifactError> {
        for record in &self.templates {
            self.client
                .delete_storage(&record.uuid)
                .await
                .map_err(|err| ArtifactError::Delete {
                    uuid: record.uuid.clone(),
                    zone: record.zone.clone(),
                    message: err.to_string(),
                })?;
            tracing::info!(zone = %record.zone, storage = %record.uuid, "template destroyed");
        }
        Ok(())
    }
}

impl<C> fmt::Display for Artifact<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |field: fn(&TemplateRecord) -> &str| {
            self.templates
                .iter()
                .map(field)
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "Private template (UUID: {}, Title: {}, Zone: {})",
            join(|record| &record.uuid),
            join(|record| &record.title),
            join(|record| &record.zone),
        )
    }
}

/// Errors raised while assembling or destroying an artifact.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactError {
    /// A zone finished without a template.
    #[error("zone {zone} has no template")]
    Incomplete {
        /// Zone lacking a template.
        zone: String,
    },
    /// A template reference is not of the form `zone:uuid`.
    #[error("invalid template reference `{0}`, expected ZONE:UUID")]
    InvalidReference(String),
    /// A template could not be deleted.
    #[error("failed to delete template {uuid} in zone {zone}: {message}")]
    Delete {
        /// Template identifier.
        uuid: String,
        /// Zone of the template.
        zone: String,
        /// Provider error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCloud;
    use rstest::rstest;

    fn record(zone: &str, uuid: &str, title: &str) -> TemplateRecord {
        TemplateRecord {
            zone: zone.to_owned(),
            uuid: uuid.to_owned(),
            title: title.to_owned(),
        }
    }

    #[test]
    fn display_and_id_list_every_template() {
        let artifact = Artifact::from_records(
            vec![
                record("fi-hel1", "a", "base-template-1"),
                record("de-fra1", "b", "base-template-2"),
            ],
            Arc::new(FakeCloud::new()),
        );
        assert_eq!(
            artifact.to_string(),
            "Private template (UUID: a,b, Title: base-template-1,base-template-2, Zone: fi-hel1,de-fra1)"
        );
        assert_eq!(artifact.id(), "fi-hel1:a\nde-fra1:b\n");
        assert_eq!(artifact.builder_id(), "upcloudltd.upcloud");
    }

    #[test]
    fn from_slots_requires_every_template() {
        let slots = vec![ZoneSlot::new("fi-hel1")];
        let err = Artifact::from_slots(&slots, Arc::new(FakeCloud::new())).expect_err("incomplete");
        assert_eq!(
            err,
            ArtifactError::Incomplete {
                zone: String::from("fi-hel1")
            }
        );
    }

    #[rstest]
    #[case("fi-hel1:abc", Some(("fi-hel1", "abc")))]
    #[case(" de-fra1:0a-1b ", Some(("de-fra1", "0a-1b")))]
    #[case("fi-hel1", None)]
    #[case(":abc", None)]
    #[case("fi-hel1:", None)]
    fn parse_reference(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = TemplateRecord::parse(input).ok();
        assert_eq!(
            parsed.as_ref().map(|found| (found.zone.as_str(), found.uuid.as_str())),
            expected
        );
    }
}
