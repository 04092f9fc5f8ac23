//! Affiliate tracker: click and purchase events against affiliate links.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::books::{check_unique_active_links, AffiliateLink, Book};
use crate::error::{EntityKind, Result, TutorError};
use crate::model::Platform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AffiliateEventKind {
    Click,
    Purchase { amount: f64 },
}

/// An inbound click or purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateEvent {
    pub tracking_id: String,
    pub kind: AffiliateEventKind,
    #[serde(default)]
    pub student_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AffiliateEvent {
    pub fn click(tracking_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            kind: AffiliateEventKind::Click,
            student_id: None,
            occurred_at,
        }
    }

    pub fn purchase(tracking_id: impl Into<String>, amount: f64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            kind: AffiliateEventKind::Purchase { amount },
            student_id: None,
            occurred_at,
        }
    }
}

/// An accepted event, resolved against its link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEvent {
    pub tracking_id: String,
    pub book_id: String,
    pub platform: Platform,
    pub kind: AffiliateEventKind,
    #[serde(default)]
    pub student_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Commission earned; zero for clicks.
    pub commission: f64,
}

/// Grouped click/purchase totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffiliateStats {
    pub clicks: u64,
    pub purchases: u64,
    pub revenue: f64,
    pub commission: f64,
}

impl AffiliateStats {
    /// Purchases per click; zero when there are no clicks.
    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.purchases, self.clicks)
    }

    fn add(&mut self, event: &TrackedEvent) {
        match event.kind {
            AffiliateEventKind::Click => self.clicks += 1,
            AffiliateEventKind::Purchase { amount } => {
                self.purchases += 1;
                self.revenue += amount;
                self.commission += event.commission;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateAnalytics {
    pub total_clicks: u64,
    pub total_purchases: u64,
    /// `total_purchases / total_clicks`, or zero without clicks.
    pub conversion_rate: f64,
    pub total_revenue: f64,
    pub total_commission: f64,
    pub by_platform: BTreeMap<Platform, AffiliateStats>,
    /// Keyed by `YYYY-MM` of the event time.
    pub by_month: BTreeMap<String, AffiliateStats>,
    pub by_book: BTreeMap<String, AffiliateStats>,
}

pub fn conversion_rate(purchases: u64, clicks: u64) -> f64 {
    if clicks == 0 {
        0.0
    } else {
        purchases as f64 / clicks as f64
    }
}

/// Records events against a fixed set of links.
#[derive(Debug, Default)]
pub struct AffiliateTracker {
    links: HashMap<String, AffiliateLink>,
    events: Vec<TrackedEvent>,
}

impl AffiliateTracker {
    /// Index `links` by tracking id.
    ///
    /// Fails on an invalid link, a repeated tracking id, or two active links
    /// for the same book and platform.
    pub fn new(links: impl IntoIterator<Item = AffiliateLink>) -> Result<Self> {
        let mut indexed = HashMap::new();
        for link in links {
            link.validate()?;
            if indexed.contains_key(&link.tracking_id) {
                return Err(TutorError::validation(
                    "tracking_id",
                    format!("tracking id {} is used by more than one link", link.tracking_id),
                ));
            }
            indexed.insert(link.tracking_id.clone(), link);
        }
        check_unique_active_links(indexed.values())?;
        Ok(Self {
            links: indexed,
            events: Vec::new(),
        })
    }

    /// Track every link nested in the catalog.
    pub fn from_catalog(books: &[Book]) -> Result<Self> {
        Self::new(
            books
                .iter()
                .flat_map(|b| b.affiliate_links.iter().cloned()),
        )
    }

    pub fn link(&self, tracking_id: &str) -> Option<&AffiliateLink> {
        self.links.get(tracking_id)
    }

    pub fn events(&self) -> &[TrackedEvent] {
        &self.events
    }

    /// Deactivate a link; later events against it are rejected.
    pub fn deactivate(&mut self, tracking_id: &str) -> Result<()> {
        let link = self
            .links
            .get_mut(tracking_id)
            .ok_or_else(|| TutorError::not_found(EntityKind::AffiliateLink, tracking_id))?;
        link.is_active = false;
        Ok(())
    }

    /// Accept one event. Rejected events leave the tracker unchanged.
    pub fn record(&mut self, event: AffiliateEvent) -> Result<&TrackedEvent> {
        let link = self
            .links
            .get(&event.tracking_id)
            .ok_or_else(|| TutorError::not_found(EntityKind::AffiliateLink, &event.tracking_id))?;
        if !link.is_usable_at(event.occurred_at) {
            tracing::warn!(tracking_id = %event.tracking_id, "rejected event for inactive affiliate link");
            return Err(TutorError::LinkInactive {
                tracking_id: event.tracking_id,
            });
        }
        let commission = match event.kind {
            AffiliateEventKind::Click => 0.0,
            AffiliateEventKind::Purchase { amount } => {
                if !amount.is_finite() || amount < 0.0 {
                    return Err(TutorError::validation(
                        "amount",
                        format!("purchase amount {amount} is not a non-negative number"),
                    ));
                }
                link.commission.amount_for(amount)
            }
        };

        self.events.push(TrackedEvent {
            tracking_id: event.tracking_id,
            book_id: link.book_id.clone(),
            platform: link.platform,
            kind: event.kind,
            student_id: event.student_id,
            occurred_at: event.occurred_at,
            commission,
        });
        let index = self.events.len() - 1;
        Ok(&self.events[index])
    }

    /// Roll all accepted events up into [`AffiliateAnalytics`].
    pub fn analytics(&self) -> AffiliateAnalytics {
        let mut total = AffiliateStats::default();
        let mut by_platform: BTreeMap<Platform, AffiliateStats> = BTreeMap::new();
        let mut by_month: BTreeMap<String, AffiliateStats> = BTreeMap::new();
        let mut by_book: BTreeMap<String, AffiliateStats> = BTreeMap::new();

        for event in &self.events {
            total.add(event);
            by_platform.entry(event.platform).or_default().add(event);
            by_month
                .entry(event.occurred_at.format("%Y-%m").to_string())
                .or_default()
                .add(event);
            by_book.entry(event.book_id.clone()).or_default().add(event);
        }

        AffiliateAnalytics {
            total_clicks: total.clicks,
            total_purchases: total.purchases,
            conversion_rate: total.conversion_rate(),
            total_revenue: total.revenue,
            total_commission: total.commission,
            by_platform,
            by_month,
            by_book,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::tests::link;
    use chrono::{Duration, TimeZone};

    fn t(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
    }

    fn tracker() -> AffiliateTracker {
        AffiliateTracker::new(vec![
            link("l1", "b1", Platform::Amazon, true),
            link("l2", "b1", Platform::Apple, true),
            link("l3", "b2", Platform::Amazon, false),
        ])
        .unwrap()
    }

    #[test]
    fn no_clicks_means_zero_conversion() {
        let analytics = tracker().analytics();
        assert_eq!(analytics.total_clicks, 0);
        assert_eq!(analytics.conversion_rate, 0.0);
        assert!(!analytics.conversion_rate.is_nan());
    }

    #[test]
    fn inactive_link_rejects_purchase_without_side_effects() {
        let mut tracker = tracker();
        tracker.record(AffiliateEvent::click("trk-l1", t(1, 2))).unwrap();
        let before = tracker.analytics();
        let err = tracker
            .record(AffiliateEvent::purchase("trk-l3", 20.0, t(1, 3)))
            .unwrap_err();
        assert!(matches!(err, TutorError::LinkInactive { .. }));
        assert_eq!(tracker.analytics(), before);
    }

    #[test]
    fn expired_link_is_inactive() {
        let mut l = link("l9", "b9", Platform::Google, true);
        l.expires_at = Some(t(3, 1));
        let mut tracker = AffiliateTracker::new(vec![l]).unwrap();
        assert!(tracker.record(AffiliateEvent::click("trk-l9", t(2, 28))).is_ok());
        assert!(matches!(
            tracker.record(AffiliateEvent::click("trk-l9", t(3, 1) + Duration::seconds(1))),
            Err(TutorError::LinkInactive { .. })
        ));
    }

    #[test]
    fn unknown_tracking_id_is_not_found() {
        let mut tracker = tracker();
        assert!(matches!(
            tracker.record(AffiliateEvent::click("nope", t(1, 1))),
            Err(TutorError::NotFound {
                entity: EntityKind::AffiliateLink,
                ..
            })
        ));
    }

    #[test]
    fn rollups_group_by_platform_month_and_book() {
        let mut tracker = tracker();
        tracker.record(AffiliateEvent::click("trk-l1", t(1, 5))).unwrap();
        tracker.record(AffiliateEvent::click("trk-l1", t(1, 6))).unwrap();
        tracker.record(AffiliateEvent::click("trk-l2", t(2, 1))).unwrap();
        tracker.record(AffiliateEvent::click("trk-l2", t(2, 2))).unwrap();
        let purchase = tracker
            .record(AffiliateEvent::purchase("trk-l1", 50.0, t(2, 3)))
            .unwrap();
        assert!((purchase.commission - 5.0).abs() < f64::EPSILON);

        let a = tracker.analytics();
        assert_eq!(a.total_clicks, 4);
        assert_eq!(a.total_purchases, 1);
        assert!((a.conversion_rate - 0.25).abs() < f64::EPSILON);
        assert!((a.total_revenue - 50.0).abs() < f64::EPSILON);
        assert!((a.total_commission - 5.0).abs() < f64::EPSILON);
        assert_eq!(a.by_platform[&Platform::Amazon].clicks, 2);
        assert_eq!(a.by_platform[&Platform::Amazon].purchases, 1);
        assert_eq!(a.by_platform[&Platform::Apple].clicks, 2);
        assert_eq!(a.by_month["2024-01"].clicks, 2);
        assert_eq!(a.by_month["2024-02"].purchases, 1);
        assert_eq!(a.by_book["b1"].clicks, 4);
        assert!((a.by_platform[&Platform::Amazon].conversion_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn deactivation_stops_tracking() {
        let mut tracker = tracker();
        tracker.deactivate("trk-l1").unwrap();
        assert!(tracker.record(AffiliateEvent::click("trk-l1", t(1, 1))).is_err());
        assert!(tracker.deactivate("missing").is_err());
    }

    #[test]
    fn construction_rejects_conflicting_links() {
        let dup_tracking = AffiliateTracker::new(vec![
            link("l1", "b1", Platform::Amazon, true),
            link("l1", "b2", Platform::Apple, true),
        ]);
        assert!(dup_tracking.is_err());

        let dup_active = AffiliateTracker::new(vec![
            link("l1", "b1", Platform::Amazon, true),
            link("l2", "b1", Platform::Amazon, true),
        ]);
        assert!(dup_active.is_err());
    }

    #[test]
    fn negative_purchases_are_rejected() {
        let mut tracker = tracker();
        assert!(matches!(
            tracker.record(AffiliateEvent::purchase("trk-l1", -1.0, t(1, 1))),
            Err(TutorError::Validation { .. })
        ));
        assert!(tracker.events().is_empty());
    }
}
