/// Lead credit ledger tests
mod common;

use bigdecimal::BigDecimal;
use common::fixture;
use rust_organizer_api::auth::Actor;

#[tokio::test]
async fn test_record_purchase_adds_credits() {
    let f = fixture();
    f.organizer_with_credits("ORG1", 2).await;

    let org = f
        .ledger
        .record_purchase("ORG1", "PKG1", 10, BigDecimal::from(500))
        .await
        .unwrap();

    assert_eq!(org.lead_credits.available, 12);
    assert_eq!(org.lead_purchase_history.len(), 2);
    let purchase = org.lead_purchase_history.last().unwrap();
    assert_eq!(purchase.package_id, "PKG1");
    assert_eq!(purchase.credits_purchased, 10);
    assert_eq!(purchase.price, BigDecimal::from(500));
    assert_eq!(f.ledger.current_balance("ORG1").await.unwrap(), 12);
}

#[tokio::test]
async fn test_zero_credit_purchase_rejected() {
    let f = fixture();
    f.organizer_with_credits("ORG1", 2).await;

    let err = f
        .ledger
        .record_purchase("ORG1", "PKG1", 0, BigDecimal::from(0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");

    let org = f.organizer("ORG1").await;
    assert_eq!(org.lead_credits.available, 2);
    assert_eq!(org.lead_purchase_history.len(), 1);
}

#[tokio::test]
async fn test_purchase_for_unknown_organizer() {
    let f = fixture();
    let err = f
        .ledger
        .record_purchase("ORG404", "PKG1", 10, BigDecimal::from(500))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = f.ledger.current_balance("ORG404").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_purchase_overflow_rejected() {
    let f = fixture();
    f.organizer_with_credits("ORG1", u32::MAX).await;

    let err = f
        .ledger
        .record_purchase("ORG1", "PKG1", 1, BigDecimal::from(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
    assert_eq!(f.organizer("ORG1").await.lead_credits.available, u32::MAX);
}

#[tokio::test]
async fn test_failed_commit_books_nothing() {
    let f = fixture();
    f.organizer_with_credits("ORG1", 2).await;

    f.store.fail_next_commit();
    let err = f
        .ledger
        .record_purchase("ORG1", "PKG1", 10, BigDecimal::from(500))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "storage_error");

    let org = f.organizer("ORG1").await;
    assert_eq!(org.lead_credits.available, 2);
    assert_eq!(org.lead_purchase_history.len(), 1);
}

#[tokio::test]
async fn test_purchase_catalog_package() {
    let f = fixture();
    f.register("ORG1").await;
    let actor = Actor::organizer("ORG1");

    let org = f
        .ledger
        .purchase_package(&actor, "ORG1", "starter")
        .await
        .unwrap();
    assert_eq!(org.lead_credits.available, 10);
    assert_eq!(org.lead_purchase_history[0].price, BigDecimal::from(500));

    let err = f
        .ledger
        .purchase_package(&actor, "ORG1", "platinum")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_purchase_is_self_service_only() {
    let f = fixture();
    f.register("ORG1").await;

    for actor in [Actor::organizer("ORG2"), Actor::admin("ADMIN1"), Actor::user("ORG1")] {
        let err = f
            .ledger
            .purchase_package(&actor, "ORG1", "starter")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
    assert_eq!(f.organizer("ORG1").await.lead_credits.available, 0);
}

#[tokio::test]
async fn test_balance_visibility() {
    let f = fixture();
    f.organizer_with_credits("ORG1", 7).await;

    assert_eq!(
        f.ledger.balance_for(&Actor::organizer("ORG1"), "ORG1").await.unwrap(),
        7
    );
    assert_eq!(
        f.ledger.balance_for(&Actor::admin("ADMIN1"), "ORG1").await.unwrap(),
        7
    );
    let err = f
        .ledger
        .balance_for(&Actor::organizer("ORG2"), "ORG1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");
}

#[tokio::test]
async fn test_list_packages() {
    let f = fixture();
    let packages = f.ledger.list_packages();
    assert_eq!(packages.len(), 3);
    assert!(packages.iter().all(|p| p.credits > 0));
}
