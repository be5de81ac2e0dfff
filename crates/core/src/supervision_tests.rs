// SPDX-License-Identifier: Apache-2.0

use super::*;
use yare::parameterized;

#[parameterized(
    ok = { ElementaryStatus::Ok, Some(0) },
    failed = { ElementaryStatus::Failed, Some(1) },
    expired = { ElementaryStatus::Expired, Some(2) },
    deactivated = { ElementaryStatus::Deactivated, None },
)]
fn severity_ranks(status: ElementaryStatus, rank: Option<u8>) {
    assert_eq!(status.severity(), rank);
}

#[test]
fn severity_orders_by_worst() {
    let worst = [ElementaryStatus::Ok, ElementaryStatus::Expired, ElementaryStatus::Failed]
        .into_iter()
        .max_by_key(|s| s.severity());
    assert_eq!(worst, Some(ElementaryStatus::Expired));
}

#[test]
fn deactivated_never_dominates() {
    // max_by_key on Option<u8>: None < Some(_), so a deactivated entry can
    // never win against any active status.
    let worst = [ElementaryStatus::Deactivated, ElementaryStatus::Ok]
        .into_iter()
        .max_by_key(|s| s.severity());
    assert_eq!(worst, Some(ElementaryStatus::Ok));
}
